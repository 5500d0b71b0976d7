//! Service configuration file parser.
//!
//! A line-oriented file in the same command style as page-server startup
//! scripts:
//!
//! | Directive | Action |
//! |-----------|--------|
//! | `/option <name>=<value>` or `/option <name> <value>` | set an engine limit |
//! | `/set <name>=<value>` or `/set <name> <value>` | default context variable |
//! | Lines starting with `;` | comment, ignored |
//! | Any other `/command` | silently skipped |
//!
//! Recognised options:
//!
//! | Option | Meaning | Default |
//! |--------|---------|---------|
//! | `max_engines` | engines open at once | 64 |
//! | `max_document_size` | largest page, in bytes | 16 MiB |
//! | `loop_limit` | `for` iterations per loop | 100000 |

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::bridge::DEFAULT_MAX_ENGINES;
use crate::script::interp::DEFAULT_LOOP_LIMIT;
use crate::var::VarStore;

/// Default cap on page size.
pub const DEFAULT_MAX_DOCUMENT_SIZE: u64 = 16 * 1024 * 1024;

/// Names a fragment can refer to as a variable.
static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap());

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug)]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Engine limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub max_engines: usize,
    pub max_document_size: u64,
    pub loop_limit: u64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            max_engines: DEFAULT_MAX_ENGINES,
            max_document_size: DEFAULT_MAX_DOCUMENT_SIZE,
            loop_limit: DEFAULT_LOOP_LIMIT,
        }
    }
}

/// Parsed service configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub options: Options,
    /// Context variables every render starts with.
    pub vars: VarStore,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config string.
    ///
    /// Unknown directives are skipped.  Returns the config and a list of any
    /// errors on recognised lines; a bad line leaves its setting at the
    /// previous value.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            let Some(rest) = line.strip_prefix('/') else { continue };

            let (cmd, args_str) = rest
                .split_once(|c: char| c.is_ascii_whitespace())
                .unwrap_or((rest, ""));
            let tokens = split_args(args_str.trim());

            let result = match cmd {
                "option" => parse_option(&tokens, &mut config.options),
                "set" => parse_set(&tokens, &mut config.vars),
                _ => Ok(()),
            };
            if let Err(message) = result {
                errors.push(ConfigError { line: lineno, message });
            }
        }

        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }
}

// ── Argument tokenizer ────────────────────────────────────────────────────────

/// Split `s` into whitespace-delimited tokens, honouring double-quoted strings
/// and `\"` escapes within them.
fn split_args(s: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            }
            c if c.is_ascii_whitespace() && !in_quotes => {
                if !cur.is_empty() {
                    args.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        args.push(cur);
    }
    args
}

/// `name=value` in one token, or `name value…` across several.
fn name_value(directive: &str, tokens: &[String]) -> Result<(String, String), String> {
    let Some(first) = tokens.first() else {
        return Err(format!("/{directive}: requires an argument"));
    };
    let (name, value) = if let Some((name, value)) = first.split_once('=') {
        (name.to_owned(), value.to_owned())
    } else if tokens.len() >= 2 {
        (first.clone(), tokens[1..].join(" "))
    } else {
        return Err(format!("/{directive}: missing value for '{first}'"));
    };
    if name.is_empty() {
        return Err(format!("/{directive}: name cannot be empty"));
    }
    Ok((name, value))
}

// ── /option ───────────────────────────────────────────────────────────────────

fn parse_option(tokens: &[String], options: &mut Options) -> Result<(), String> {
    let (name, value) = name_value("option", tokens)?;
    let number = |min: u64| -> Result<u64, String> {
        match value.parse::<u64>() {
            Ok(n) if n >= min => Ok(n),
            Ok(_) => Err(format!("/option: {name} must be at least {min}")),
            Err(_) => Err(format!("/option: {name} expects a number, got '{value}'")),
        }
    };
    match name.as_str() {
        "max_engines" => {
            options.max_engines = usize::try_from(number(1)?)
                .map_err(|_| format!("/option: {name} is too large"))?;
        }
        "max_document_size" => options.max_document_size = number(0)?,
        "loop_limit" => options.loop_limit = number(1)?,
        _ => return Err(format!("/option: unknown option '{name}'")),
    }
    Ok(())
}

// ── /set ─────────────────────────────────────────────────────────────────────

fn parse_set(tokens: &[String], vars: &mut VarStore) -> Result<(), String> {
    let (name, value) = name_value("set", tokens)?;
    if !IDENTIFIER.is_match(&name) {
        return Err(format!("/set: '{name}' is not a valid variable name"));
    }
    vars.set(name, value);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
