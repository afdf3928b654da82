//! Wildcard route resolution with specificity scoring.
//!
//! A [`RoutingTable`] maps patterns containing `*` wildcards to destinations.
//! Resolving a key tests every pattern and keeps the most specific match,
//! where specificity is the share of the key covered by literal pattern text:
//!
//! ```text
//! key:      GET:users/5.json   (16 chars)
//! GET:*          -> 4/16  = 0.25
//! GET:users/*    -> 10/16 = 0.625
//! GET:*.json     -> 9/16  = 0.563
//! *              -> fallback (0.0001)
//! ```
//!
//! The same resolver selects controllers, CSRF rules, site configuration by
//! host and model query wildcards.

use std::collections::HashMap;

use regex::Regex;

use crate::core::{Error, Result};

/// Specificity assigned to the bare `*` fallback pattern.
pub const FALLBACK_SPECIFICITY: f64 = 0.0001;

/// Compiled form of a single pattern.
#[derive(Debug)]
enum Matcher {
    /// Bare `*`.
    Fallback,
    /// Anchored regex plus the number of literal characters in the pattern.
    Wildcard { regex: Regex, literal_chars: usize },
}

impl Matcher {
    fn compile(pattern: &str) -> Result<Self> {
        if pattern == "*" {
            return Ok(Matcher::Fallback);
        }

        let literals: Vec<&str> = pattern.split('*').collect();
        let body = literals
            .iter()
            .map(|part| format!("({})", regex::escape(part)))
            .collect::<Vec<_>>()
            .join(".*");

        let regex = Regex::new(&format!("(?s)^{}$", body))
            .map_err(|e| Error::Internal(format!("invalid route pattern '{}': {}", pattern, e)))?;

        Ok(Matcher::Wildcard {
            regex,
            literal_chars: literals.iter().map(|part| part.chars().count()).sum(),
        })
    }

    /// Specificity of `key` against this pattern, or None when it does not match.
    fn score(&self, key: &str) -> Option<f64> {
        match self {
            Matcher::Fallback => Some(FALLBACK_SPECIFICITY),
            Matcher::Wildcard {
                regex,
                literal_chars,
            } => {
                let captures = regex.captures(key)?;
                let key_chars = key.chars().count();
                if key_chars == 0 {
                    return Some(if *literal_chars == 0 && captures.len() == 2 {
                        1.0
                    } else {
                        0.0
                    });
                }
                let captured: usize = captures
                    .iter()
                    .skip(1)
                    .flatten()
                    .map(|m| m.as_str().chars().count())
                    .sum();
                Some(round3(captured as f64 / key_chars as f64))
            }
        }
    }
}

#[inline]
fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// A routed destination and how specifically it matched.
#[derive(Debug, PartialEq)]
pub struct MatchResult<'a, T> {
    pub pattern: &'a str,
    pub destination: &'a T,
    pub specificity: f64,
}

#[derive(Debug)]
struct Route<T> {
    pattern: String,
    matcher: Matcher,
    destination: T,
}

/// Ordered pattern → destination table.
#[derive(Debug)]
pub struct RoutingTable<T> {
    routes: Vec<Route<T>>,
    /// Pattern → index, for exact-key lookups and replacement.
    index: HashMap<String, usize>,
}

impl<T> Default for RoutingTable<T> {
    fn default() -> Self {
        Self {
            routes: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> RoutingTable<T> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from pattern/destination pairs, in order.
    pub fn from_pairs<I, P>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, T)>,
        P: Into<String>,
    {
        let mut table = Self::new();
        for (pattern, destination) in pairs {
            table.insert(pattern, destination)?;
        }
        Ok(table)
    }

    /// Add a pattern. An existing pattern keeps its position and gets the new destination.
    pub fn insert(&mut self, pattern: impl Into<String>, destination: T) -> Result<()> {
        let pattern = pattern.into();
        if let Some(&i) = self.index.get(&pattern) {
            self.routes[i].destination = destination;
            return Ok(());
        }

        let matcher = Matcher::compile(&pattern)?;
        self.index.insert(pattern.clone(), self.routes.len());
        self.routes.push(Route {
            pattern,
            matcher,
            destination,
        });
        Ok(())
    }

    /// Resolve `key` to the most specific matching destination.
    pub fn route(&self, key: &str) -> Option<MatchResult<'_, T>> {
        // A literal pattern equal to the key always wins. A key containing
        // `*` may equal a wildcard pattern, which must be scored instead.
        if let Some(&i) = self.index.get(key).filter(|_| !key.contains('*')) {
            let route = &self.routes[i];
            return Some(MatchResult {
                pattern: &route.pattern,
                destination: &route.destination,
                specificity: 1.0,
            });
        }

        let mut best: Option<MatchResult<'_, T>> = None;
        let mut fallback: Option<&Route<T>> = None;

        for route in &self.routes {
            if matches!(route.matcher, Matcher::Fallback) {
                fallback.get_or_insert(route);
                continue;
            }
            let Some(specificity) = route.matcher.score(key) else {
                continue;
            };
            if best.as_ref().map_or(true, |b| specificity > b.specificity) {
                best = Some(MatchResult {
                    pattern: &route.pattern,
                    destination: &route.destination,
                    specificity,
                });
                if specificity >= 1.0 {
                    break;
                }
            }
        }

        best.or_else(|| {
            fallback.map(|route| MatchResult {
                pattern: &route.pattern,
                destination: &route.destination,
                specificity: FALLBACK_SPECIFICITY,
            })
        })
    }

    /// Patterns in insertion order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.pattern.as_str())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Specificity of `key` against a single pattern, or None when it does not match.
pub fn wildcard_match(pattern: &str, key: &str) -> Option<f64> {
    Matcher::compile(pattern).ok()?.score(key)
}

/// One-shot resolution over borrowed pairs.
pub fn route<'a, T: Clone + 'a, I>(key: &str, pairs: I) -> Option<T>
where
    I: IntoIterator<Item = (&'a str, &'a T)>,
{
    let table = RoutingTable::from_pairs(pairs).ok()?;
    table.route(key).map(|m| T::clone(m.destination))
}
