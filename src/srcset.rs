//! Responsive-candidate selection for `srcset`-style attributes.
//!
//! Candidates are split the way browsers split them: a URL runs until
//! whitespace, so commas inside a URL (`c_fill,w_640`) do not end it.

use crate::canonical::is_inline_data;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Descriptor {
    Width(u32),
    Density(f64),
    None,
}

impl Descriptor {
    /// Widths score as-is and densities as `x * 1000`, so `2x` outranks any
    /// width below 2000. A bare URL scores zero.
    pub fn score(&self) -> i64 {
        match *self {
            Descriptor::Width(w) => i64::from(w),
            Descriptor::Density(x) if x.is_finite() && x > 0.0 => (x * 1000.0) as i64,
            Descriptor::Density(_) | Descriptor::None => 0,
        }
    }

    fn parse(token: &str) -> Self {
        let token = token.trim().to_ascii_lowercase();
        if let Some(w) = token.strip_suffix('w') {
            return w.parse::<u32>().map(Descriptor::Width).unwrap_or(Descriptor::None);
        }
        if let Some(x) = token.strip_suffix('x') {
            return x.parse::<f64>().map(Descriptor::Density).unwrap_or(Descriptor::None);
        }
        Descriptor::None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SrcsetCandidate {
    pub url: String,
    pub descriptor: Descriptor,
}

pub fn parse_srcset(value: &str) -> Vec<SrcsetCandidate> {
    let chars: Vec<char> = value.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == ',') {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }

        let start = i;
        while i < chars.len() && !chars[i].is_whitespace() {
            i += 1;
        }
        let mut url: String = chars[start..i].iter().collect();

        let mut descriptors = String::new();
        if url.ends_with(',') {
            // "a.jpg, b.jpg" - the trailing comma closes a bare candidate.
            url = url.trim_end_matches(',').to_string();
        } else {
            let mut depth = 0usize;
            while i < chars.len() {
                let ch = chars[i];
                match ch {
                    '(' => depth += 1,
                    ')' => depth = depth.saturating_sub(1),
                    ',' if depth == 0 => {
                        i += 1;
                        break;
                    }
                    _ => {}
                }
                descriptors.push(ch);
                i += 1;
            }
        }

        if url.is_empty() || is_inline_data(&url) {
            continue;
        }
        let descriptor = descriptors
            .split_whitespace()
            .next()
            .map(Descriptor::parse)
            .unwrap_or(Descriptor::None);
        out.push(SrcsetCandidate { url, descriptor });
    }

    out
}

/// Highest-scoring candidate URL; earlier candidates win ties.
pub fn best_candidate(value: &str) -> Option<String> {
    let mut best: Option<SrcsetCandidate> = None;
    for candidate in parse_srcset(value) {
        let better = best
            .as_ref()
            .map(|b| candidate.descriptor.score() > b.descriptor.score())
            .unwrap_or(true);
        if better {
            best = Some(candidate);
        }
    }
    best.map(|c| c.url)
}
