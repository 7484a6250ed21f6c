//! Destructive-command classification over normalized templates. Matching
//! happens on template tokens, so `rm -rf {}` catches every concrete rm
//! rendering.

use clai_protocol::Risk;

/// Classify a normalized template. Anything not recognized is `Safe`;
/// destructive templates survive ranking but are demoted.
pub fn classify(cmd_norm: &str) -> Risk {
    let tokens: Vec<&str> = cmd_norm.split_whitespace().collect();
    for segment in tokens.split(|t| matches!(*t, "&&" | "||" | "|" | ";")) {
        if segment_is_destructive(segment) {
            return Risk::Destructive;
        }
    }
    Risk::Safe
}

fn segment_is_destructive(tokens: &[&str]) -> bool {
    // Skip wrappers so `sudo rm -rf {}` is still caught.
    let tokens = match tokens {
        ["sudo" | "nohup" | "time" | "nice" | "env", rest @ ..] => rest,
        _ => tokens,
    };
    let Some(&head) = tokens.first() else {
        return false;
    };
    let flags_joined: String = tokens
        .iter()
        .skip(1)
        .filter(|t| t.starts_with('-'))
        .flat_map(|t| t.trim_start_matches('-').chars())
        .collect();

    match head {
        "rm" => flags_joined.contains('r') && flags_joined.contains('f'),
        "git" => match tokens.get(1).copied() {
            Some("push") => tokens
                .iter()
                .any(|t| *t == "--force" || *t == "-f" || *t == "--force-with-lease"),
            Some("reset") => tokens.iter().any(|t| *t == "--hard"),
            Some("clean") => flags_joined.contains('f'),
            Some("checkout") => tokens.iter().any(|t| *t == "--force" || *t == "-f"),
            _ => false,
        },
        "dd" => tokens.iter().any(|t| t.starts_with("of=")),
        "shutdown" | "reboot" | "halt" | "poweroff" => true,
        "kill" | "pkill" | "killall" => tokens.iter().any(|t| *t == "-9" || *t == "-KILL"),
        "truncate" => tokens.iter().any(|t| *t == "-s"),
        "chmod" => flags_joined.contains('R') && tokens.iter().any(|t| *t == "777"),
        "mkfs" => true,
        other => other.starts_with("mkfs."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn classic_footguns_are_destructive() {
        for cmd in [
            "rm -rf {}",
            "rm -fr {}",
            "sudo rm -rf {}",
            "git push --force",
            "git push -f",
            "git reset --hard",
            "git clean -fd",
            "dd if={} of={}",
            "mkfs.ext4 {}",
            "kill -9 {}",
            "shutdown -h now",
            "chmod -R 777 {}",
        ] {
            assert_eq!(classify(cmd), Risk::Destructive, "{cmd}");
        }
    }

    #[test]
    fn ordinary_commands_are_safe() {
        for cmd in [
            "rm {}",
            "rm -i {}",
            "git push",
            "git reset {}",
            "git checkout {}",
            "kill {}",
            "ls -la",
            "truncate {}",
        ] {
            assert_eq!(classify(cmd), Risk::Safe, "{cmd}");
        }
    }

    #[test]
    fn destructive_tail_of_a_pipeline_is_caught() {
        assert_eq!(classify("make {} && rm -rf {}"), Risk::Destructive);
    }
}
