/// Text helpers for parsing tool output

/// Keep only letters and digits, dropping whitespace, punctuation and the
/// tree-drawing characters lsblk prefixes child devices with.
pub fn retain_alphanumeric(input: &str) -> String {
    input.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Lower-case and trim tool output.
pub fn normalize_output(output: &str) -> String {
    output.trim().to_lowercase()
}

/// Split tool output into trimmed, non-empty lines.
pub fn non_empty_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retain_alphanumeric() {
        assert_eq!(retain_alphanumeric("  sda1\t"), "sda1");
        assert_eq!(retain_alphanumeric("/dev/sda-1!"), "devsda1");
        assert_eq!(retain_alphanumeric("├─sda1"), "sda1");
        assert_eq!(retain_alphanumeric("└─nvme0n1p2"), "nvme0n1p2");
        assert_eq!(retain_alphanumeric(""), "");
    }

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output("  TRUE\n"), "true");
        assert_eq!(normalize_output("/dev/SDA1\n/dev/sdb2\n"), "/dev/sda1\n/dev/sdb2");
    }

    #[test]
    fn test_normalize_output_is_idempotent() {
        for raw in ["  /dev/RHEL/Root \n", "true", "", "\n\n", "Fedora Linux 39\nID=fedora"] {
            let once = normalize_output(raw);
            assert_eq!(normalize_output(&once), once);
        }
    }

    #[test]
    fn test_non_empty_lines() {
        assert_eq!(
            non_empty_lines("/dev/sda1\n\n  /dev/sdb1  \n"),
            vec!["/dev/sda1".to_string(), "/dev/sdb1".to_string()]
        );
        assert!(non_empty_lines("   \n").is_empty());
    }
}
