//! Destination extraction from ssh-style argument lists.
//!
//! The CLI passes everything after its own flags straight to `ssh`, so the
//! destination has to be fished out of an argv we do not otherwise
//! interpret: the first non-flag token that is not the value of a preceding
//! flag is the `user@host` (or bare `host`) destination.

/// ssh flags that consume the following argument as their value.
const FLAGS_WITH_VALUES: &[&str] = &[
    "-b", "-c", "-D", "-E", "-e", "-F", "-I", "-i", "-L", "-l", "-m", "-O", "-o", "-p", "-R",
    "-S", "-W", "-w",
];

/// Extract `(user, host)` from ssh argv. Either may come back empty: no
/// user means a bare-host destination, no host means the argv carries no
/// destination at all.
pub fn parse(args: &[String]) -> (String, String) {
    let mut skip_next = false;

    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }

        if arg.starts_with('-') {
            // For bundled short options (`-4p`), the last letter decides
            // whether a value follows.
            let flag = if arg.chars().count() > 2 && !arg.contains('=') {
                arg.chars().last().map(|c| format!("-{c}")).unwrap_or_default()
            } else {
                arg.clone()
            };
            if FLAGS_WITH_VALUES.contains(&flag.as_str()) {
                skip_next = true;
            }
            continue;
        }

        return match arg.split_once('@') {
            Some((user, host)) => (user.to_string(), host.to_string()),
            None => (String::new(), arg.clone()),
        };
    }

    (String::new(), String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_user_at_host() {
        assert_eq!(
            parse(&args(&["deploy@prod.example"])),
            ("deploy".into(), "prod.example".into())
        );
    }

    #[test]
    fn test_bare_host() {
        assert_eq!(
            parse(&args(&["prod.example"])),
            ("".into(), "prod.example".into())
        );
    }

    #[test]
    fn test_empty_args() {
        assert_eq!(parse(&args(&[])), ("".into(), "".into()));
    }

    #[test]
    fn test_flag_value_is_not_a_destination() {
        assert_eq!(
            parse(&args(&["-p", "2222", "alice@box.example"])),
            ("alice".into(), "box.example".into())
        );
        assert_eq!(
            parse(&args(&["-i", "id_ed25519", "-o", "BatchMode=yes", "host"])),
            ("".into(), "host".into())
        );
    }

    #[test]
    fn test_boolean_flags_are_skipped() {
        assert_eq!(
            parse(&args(&["-4", "-A", "deploy@host"])),
            ("deploy".into(), "host".into())
        );
    }

    #[test]
    fn test_bundled_short_options_value_follows_last_letter() {
        // `-4p 22 host`: the trailing `p` takes the next argument.
        assert_eq!(
            parse(&args(&["-4p", "22", "host"])),
            ("".into(), "host".into())
        );
    }

    #[test]
    fn test_remote_command_after_destination_ignored() {
        assert_eq!(
            parse(&args(&["deploy@host", "uptime", "-a"])),
            ("deploy".into(), "host".into())
        );
    }
}
