//! SVG line charts.
//!
//! Points are given in data coordinates. The chart tracks the bounding box
//! of everything added (unless limits were locked) and maps it onto the
//! drawing area, flipping the y axis and leaving `pad` pixels on each side.
//! Every element id and class is prefixed so several charts can share a page
//! and a stylesheet.

use uuid::Uuid;

use crate::export::escape;

/// Data-space bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    locked: bool,
}

impl Limits {
    fn span_x(&self) -> f64 {
        nonzero(self.max_x - self.min_x)
    }

    fn span_y(&self) -> f64 {
        nonzero(self.max_y - self.min_y)
    }
}

#[inline]
fn nonzero(span: f64) -> f64 {
    if span > 0.0 {
        span
    } else {
        1.0
    }
}

#[derive(Debug)]
pub struct Chart {
    prefix: String,
    width: u32,
    height: u32,
    pad: u32,
    limits: Option<Limits>,
    lines: Vec<(String, Vec<(f64, f64)>)>,
    grid_x: Vec<f64>,
    grid_y: Vec<f64>,
    css: Option<String>,
}

impl Default for Chart {
    fn default() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self::with_prefix(&format!("svg-{}", &id[..13]))
    }
}

impl Chart {
    /// Chart with a random id prefix.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            width: 0,
            height: 0,
            pad: 0,
            limits: None,
            lines: Vec::new(),
            grid_x: Vec::new(),
            grid_y: Vec::new(),
            css: None,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Physical size in pixels. A missing height makes the chart square.
    pub fn set_dimensions(&mut self, width: u32, height: Option<u32>, pad: u32) {
        self.width = width;
        self.height = height.unwrap_or(width);
        self.pad = pad;
    }

    /// Set the bounding box. Locked limits ignore later lines and grids.
    pub fn set_limits(&mut self, min_x: f64, min_y: f64, max_x: f64, max_y: f64, locked: bool) {
        self.limits = Some(Limits {
            min_x,
            min_y,
            max_x,
            max_y,
            locked,
        });
    }

    pub fn limits(&self) -> Option<Limits> {
        self.limits
    }

    fn extend_limits(&mut self, xs: &[f64], ys: &[f64]) {
        let min = |v: &[f64]| v.iter().copied().fold(f64::INFINITY, f64::min);
        let max = |v: &[f64]| v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if let Some(limits) = &mut self.limits {
            if limits.locked {
                return;
            }
            if !xs.is_empty() {
                limits.min_x = limits.min_x.min(min(xs));
                limits.max_x = limits.max_x.max(max(xs));
            }
            if !ys.is_empty() {
                limits.min_y = limits.min_y.min(min(ys));
                limits.max_y = limits.max_y.max(max(ys));
            }
        } else if !xs.is_empty() && !ys.is_empty() {
            self.set_limits(min(xs), min(ys), max(xs), max(ys), false);
        }
    }

    /// Add a polyline. Unlabelled lines are named by their position.
    pub fn add_line(&mut self, label: Option<&str>, points: &[(f64, f64)]) {
        let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
        let ys: Vec<f64> = points.iter().map(|p| p.1).collect();
        self.extend_limits(&xs, &ys);

        let label = label
            .map(str::to_string)
            .unwrap_or_else(|| self.lines.len().to_string());
        self.lines.push((label, points.to_vec()));
    }

    /// Vertical lines at each `x`, horizontal lines at each `y`.
    pub fn add_grid(&mut self, xs: &[f64], ys: &[f64]) {
        self.extend_limits(xs, ys);
        self.grid_x = xs.to_vec();
        self.grid_y = ys.to_vec();
    }

    /// Embedded stylesheet; `None` uses the default line/point/grid styles.
    pub fn set_css(&mut self, css: Option<&str>) {
        let css = css.map(str::to_string).unwrap_or_else(|| {
            let p = &self.prefix;
            format!(
                "\n#{p}-lines {{ stroke: #C00; stroke-width: 2; stroke-linecap: round; fill: transparent }}\
                 \n#{p}-points {{ stroke: #C00; stroke-width: 10; stroke-linecap: round; }}\
                 \n#{p}-grid {{ stroke: #CCC; stroke-width: .5; }}\n"
            )
        });
        self.css = Some(css);
    }

    fn size(&self) -> (u32, u32) {
        match (self.width, self.limits) {
            (0, Some(limits)) => (
                (limits.max_x - limits.min_x).max(0.0) as u32,
                (limits.max_y - limits.min_y).max(0.0) as u32,
            ),
            _ => (self.width, self.height),
        }
    }

    /// Map data points to pixel coordinates.
    pub fn normalize(&self, points: &[(f64, f64)]) -> Vec<(i64, i64)> {
        let Some(limits) = self.limits else {
            return points.iter().map(|p| (p.0.round() as i64, p.1.round() as i64)).collect();
        };
        let (width, height) = self.size();
        let (width, height, pad) = (width as f64, height as f64, self.pad as f64);
        let scale_x = (width - 2.0 * pad) / limits.span_x();
        let scale_y = (height - 2.0 * pad) / limits.span_y();

        points
            .iter()
            .map(|&(x, y)| {
                (
                    ((x - limits.min_x) * scale_x + pad).round() as i64,
                    (height - (y - limits.min_y) * scale_y - pad).round() as i64,
                )
            })
            .collect()
    }

    fn render_grid(&self, out: &mut String) {
        let p = &self.prefix;
        let Some(limits) = self.limits else {
            return;
        };
        out.push_str(&format!("<g class=\"grid\" id=\"{p}-grid\">"));
        let vertical = self
            .grid_x
            .iter()
            .enumerate()
            .map(|(i, &x)| ("x", i, x, [(x, limits.min_y), (x, limits.max_y)]));
        let horizontal = self
            .grid_y
            .iter()
            .enumerate()
            .map(|(i, &y)| ("y", i, y, [(limits.min_x, y), (limits.max_x, y)]));

        for (axis, i, value, ends) in vertical.chain(horizontal) {
            let n = self.normalize(&ends);
            let label = format!("{axis}-{i}");
            out.push_str(&format!(
                "<line x1=\"{}\" x2=\"{}\" y1=\"{}\" y2=\"{}\" id=\"{p}-grid-{label}\" \
                 class=\"grid grid-{label} grid-{axis} {p}-grid {p}-grid-{label} {p}-grid-{axis}\" \
                 desc=\"{value}\"/>",
                n[0].0, n[1].0, n[0].1, n[1].1,
            ));
        }
        out.push_str("</g>");
    }

    fn render_lines(&self, out: &mut String) {
        let p = &self.prefix;
        out.push_str(&format!("<g class=\"lines\" id=\"{p}-lines\">"));
        for (label, points) in &self.lines {
            let label = escape(label);
            let coords: Vec<String> = self
                .normalize(points)
                .iter()
                .map(|(x, y)| format!("{x},{y}"))
                .collect();
            out.push_str(&format!(
                "<polyline points=\"{}\" id=\"{p}-line-{label}\" class=\"line {p}-line\"/>",
                coords.join(" ")
            ));
        }
        out.push_str("</g>");
    }

    fn render_points(&self, out: &mut String) {
        let p = &self.prefix;
        out.push_str(&format!("<g class=\"points\" id=\"{p}-points\">"));
        for (base, points) in &self.lines {
            let base = escape(base);
            for (i, ((x, y), (dx, dy))) in self.normalize(points).iter().zip(points).enumerate() {
                out.push_str(&format!(
                    "<line x1=\"{x}\" x2=\"{x}\" y1=\"{y}\" y2=\"{y}\" id=\"{p}-point-{base}-{i}\" \
                     class=\"point point-{base} point-{base}-{i} {p}-point {p}-point-{base} {p}-point-{base}-{i}\" \
                     desc=\"{dx}x{dy}\"/>"
                ));
            }
        }
        out.push_str("</g>");
    }

    /// Render the `<svg>` element, or a standalone document when `full`.
    pub fn render(&self, full: bool) -> String {
        let (width, height) = self.size();
        let mut out = String::new();
        if full {
            out.push_str("<?xml version=\"1.0\"?>\n");
        }
        out.push_str(&format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" id=\"{}\" width=\"{width}\" height=\"{height}\" \
             viewBox=\"0 0 {width} {height}\" preserveAspectRatio=\"xMinYMin meet\">",
            escape(&self.prefix)
        ));
        if let Some(css) = &self.css {
            out.push_str(&format!("<style><![CDATA[{}]]></style>", css));
        }
        self.render_grid(&mut out);
        self.render_lines(&mut out);
        self.render_points(&mut out);
        out.push_str("</svg>");
        if full {
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chart() -> Chart {
        let mut chart = Chart::with_prefix("c");
        chart.set_dimensions(110, Some(60), 5);
        chart.add_line(Some("sales"), &[(0.0, 0.0), (5.0, 10.0), (10.0, 5.0)]);
        chart
    }

    #[test]
    fn test_limits_grow_with_lines_and_grid() {
        let mut chart = chart();
        chart.add_line(None, &[(-2.0, 1.0), (4.0, 12.0)]);
        chart.add_grid(&[20.0], &[]);
        let limits = chart.limits().unwrap();
        assert_eq!(
            (limits.min_x, limits.min_y, limits.max_x, limits.max_y),
            (-2.0, 0.0, 20.0, 12.0)
        );
    }

    #[test]
    fn test_locked_limits_ignore_new_points() {
        let mut chart = Chart::with_prefix("c");
        chart.set_limits(0.0, 0.0, 1.0, 1.0, true);
        chart.add_line(None, &[(5.0, 5.0)]);
        assert_eq!(chart.limits().unwrap().max_x, 1.0);
    }

    #[test]
    fn test_normalize_flips_y_and_pads() {
        let chart = chart();
        // 100x50 drawing area inside a 5px pad
        assert_eq!(
            chart.normalize(&[(0.0, 0.0), (5.0, 10.0), (10.0, 5.0)]),
            vec![(5, 55), (55, 5), (105, 30)]
        );
    }

    #[test]
    fn test_size_defaults_to_data_span() {
        let mut chart = Chart::with_prefix("c");
        chart.add_line(None, &[(0.0, 0.0), (40.0, 30.0)]);
        let svg = chart.render(false);
        assert!(svg.contains("width=\"40\" height=\"30\" viewBox=\"0 0 40 30\""));
        assert!(svg.contains("id=\"c-line-0\""));
    }

    #[test]
    fn test_render() {
        let mut chart = chart();
        chart.add_grid(&[5.0], &[5.0]);
        chart.set_css(None);
        let svg = chart.render(true);

        assert!(svg.starts_with("<?xml version=\"1.0\"?>\n<svg xmlns=\"http://www.w3.org/2000/svg\" id=\"c\""));
        assert!(svg.contains("#c-lines { stroke: #C00;"));
        assert!(svg.contains(
            "<polyline points=\"5,55 55,5 105,30\" id=\"c-line-sales\" class=\"line c-line\"/>"
        ));
        assert!(svg.contains("id=\"c-point-sales-1\""));
        assert!(svg.contains("desc=\"5x10\""));
        assert!(svg.contains(
            "<line x1=\"55\" x2=\"55\" y1=\"55\" y2=\"5\" id=\"c-grid-x-0\""
        ));
        assert!(svg.contains("id=\"c-grid-y-0\""));
        assert!(svg.ends_with("</svg>\n"));
    }

    #[test]
    fn test_random_prefixes_differ() {
        let (a, b) = (Chart::new(), Chart::new());
        assert!(a.prefix().starts_with("svg-"));
        assert_ne!(a.prefix(), b.prefix());
    }
}
