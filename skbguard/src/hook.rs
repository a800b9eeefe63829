//! Attachment targets.
//!
//! A hook is supplied by the caller, not derived from the bytecode
//! object. Textual form, colon-delimited:
//!
//! - `tracepoint:<category>:<event>`
//! - `kprobe:<symbol>` / `kretprobe:<symbol>`
//! - `cgroup-ingress:<cgroup path>`

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookSpec {
    Tracepoint { category: String, event: String },
    Kprobe { symbol: String, retprobe: bool },
    CgroupIngress { cgroup: PathBuf },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid hook spec `{0}`")]
pub struct ParseHookError(String);

impl FromStr for HookSpec {
    type Err = ParseHookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseHookError(s.to_owned());
        let (kind, rest) = s.split_once(':').ok_or_else(invalid)?;
        if rest.is_empty() {
            return Err(invalid());
        }
        match kind {
            "tracepoint" => {
                let (category, event) = rest.split_once(':').ok_or_else(invalid)?;
                if category.is_empty() || event.is_empty() {
                    return Err(invalid());
                }
                Ok(Self::Tracepoint {
                    category: category.to_owned(),
                    event: event.to_owned(),
                })
            }
            "kprobe" => Ok(Self::Kprobe {
                symbol: rest.to_owned(),
                retprobe: false,
            }),
            "kretprobe" => Ok(Self::Kprobe {
                symbol: rest.to_owned(),
                retprobe: true,
            }),
            "cgroup-ingress" => Ok(Self::CgroupIngress {
                cgroup: PathBuf::from(rest),
            }),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for HookSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tracepoint { category, event } => {
                write!(f, "tracepoint:{category}:{event}")
            }
            Self::Kprobe { symbol, retprobe: false } => write!(f, "kprobe:{symbol}"),
            Self::Kprobe { symbol, retprobe: true } => write!(f, "kretprobe:{symbol}"),
            Self::CgroupIngress { cgroup } => {
                write!(f, "cgroup-ingress:{}", cgroup.display())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_kind() {
        assert_eq!(
            "tracepoint:syscalls:sys_enter_write".parse(),
            Ok(HookSpec::Tracepoint {
                category: String::from("syscalls"),
                event: String::from("sys_enter_write"),
            })
        );
        assert_eq!(
            "kprobe:do_unlinkat".parse(),
            Ok(HookSpec::Kprobe {
                symbol: String::from("do_unlinkat"),
                retprobe: false,
            })
        );
        assert_eq!(
            "kretprobe:do_unlinkat".parse(),
            Ok(HookSpec::Kprobe {
                symbol: String::from("do_unlinkat"),
                retprobe: true,
            })
        );
        assert_eq!(
            "cgroup-ingress:/sys/fs/cgroup".parse(),
            Ok(HookSpec::CgroupIngress {
                cgroup: PathBuf::from("/sys/fs/cgroup"),
            })
        );
    }

    #[test]
    fn rejects_malformed_specs() {
        for spec in [
            "",
            "kprobe",
            "kprobe:",
            "tracepoint:syscalls",
            "tracepoint::sys_enter_write",
            "uprobe:main",
        ] {
            assert!(spec.parse::<HookSpec>().is_err(), "{spec:?}");
        }
    }

    #[test]
    fn display_round_trips() {
        for spec in [
            "tracepoint:syscalls:sys_enter_write",
            "kprobe:do_unlinkat",
            "kretprobe:do_unlinkat",
            "cgroup-ingress:/sys/fs/cgroup",
        ] {
            let parsed: HookSpec = spec.parse().unwrap();
            assert_eq!(parsed.to_string(), spec);
        }
    }
}
