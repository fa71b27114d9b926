//! Small flag helpers shared by the binaries. Flags take `--name value` or
//! `--name=value`; unparseable values are treated as absent.

use std::path::PathBuf;
use std::str::FromStr;

pub fn args() -> Vec<String> {
    std::env::args().skip(1).collect()
}

pub fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|arg| arg == name)
}

pub fn parse_arg<T: FromStr>(args: &[String], name: &str) -> Option<T> {
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&prefix)
            && let Ok(v) = raw.trim().parse::<T>()
        {
            return Some(v);
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && let Ok(v) = next.trim().parse::<T>()
        {
            return Some(v);
        }
    }
    None
}

pub fn parse_path_arg(args: &[String], name: &str) -> Option<PathBuf> {
    parse_path_list_arg(args, name).into_iter().next()
}

/// Every value given for a repeatable path flag. A single value may also be a
/// comma-separated list.
pub fn parse_path_list_arg(args: &[String], name: &str) -> Vec<PathBuf> {
    let prefix = format!("{name}=");
    let mut out = Vec::new();
    for (idx, arg) in args.iter().enumerate() {
        let raw = if let Some(v) = arg.strip_prefix(&prefix) {
            v
        } else if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.starts_with("--")
        {
            next.as_str()
        } else {
            continue;
        };
        out.extend(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        );
    }
    out
}
