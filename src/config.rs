//! Environment-derived configuration, read once at startup.
//!
//! Per spec.md §9, the recognized environment variables are a closed set:
//! `SSHP_OPTS`, `SSHP_DOMAINS`, `SSHP_SYM_BEG`, `SSHP_SYM_END`,
//! `SSHP_SYM_PROG`, `SSHP_SYM_RES`. They are read exactly once into an
//! immutable value; nothing downstream calls `std::env::var` again.

/// Glyphs used by the renderer's progress bar, overridable via environment.
#[derive(Debug, Clone)]
pub struct Glyphs {
    pub bar_begin: String,
    pub bar_end: String,
    pub bar_progress: char,
    pub bar_rest: char,
}

impl Default for Glyphs {
    fn default() -> Self {
        Glyphs {
            bar_begin: "[".to_string(),
            bar_end: "]".to_string(),
            bar_progress: '#',
            bar_rest: '.',
        }
    }
}

/// Immutable snapshot of the environment-derived knobs.
#[derive(Debug, Clone)]
pub struct Config {
    /// Default SSH options, shell-split, prepended to every child's argv
    /// ahead of any `--ssh-opt` pass-through and the mandatory BatchMode.
    pub default_ssh_opts: Vec<String>,
    /// Domain search list used by the (external) hostname resolver; carried
    /// here only so the CLI front-end can read it from one place.
    pub domains: Vec<String>,
    pub glyphs: Glyphs,
}

impl Config {
    /// Read the closed set of `SSHP_*` environment variables once.
    pub fn from_env() -> anyhow::Result<Self> {
        let default_ssh_opts = match std::env::var("SSHP_OPTS") {
            Ok(raw) if !raw.trim().is_empty() => shell_words::split(&raw)
                .map_err(|e| anyhow::anyhow!("invalid SSHP_OPTS: {e}"))?,
            _ => Vec::new(),
        };

        let domains = std::env::var("SSHP_DOMAINS")
            .ok()
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let mut glyphs = Glyphs::default();
        if let Ok(v) = std::env::var("SSHP_SYM_BEG") {
            if !v.is_empty() {
                glyphs.bar_begin = v;
            }
        }
        if let Ok(v) = std::env::var("SSHP_SYM_END") {
            if !v.is_empty() {
                glyphs.bar_end = v;
            }
        }
        if let Ok(v) = std::env::var("SSHP_SYM_PROG") {
            if let Some(c) = v.chars().next() {
                glyphs.bar_progress = c;
            }
        }
        if let Ok(v) = std::env::var("SSHP_SYM_RES") {
            if let Some(c) = v.chars().next() {
                glyphs.bar_rest = c;
            }
        }

        Ok(Config {
            default_ssh_opts,
            domains,
            glyphs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glyph_defaults() {
        let g = Glyphs::default();
        assert_eq!(g.bar_begin, "[");
        assert_eq!(g.bar_progress, '#');
    }
}
