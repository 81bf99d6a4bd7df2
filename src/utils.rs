use std::sync::LazyLock;
use std::time::Duration;

use rand::Rng;
use regex::Regex;

use crate::source::DelayRange;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static INLINE_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{a0}\u{3000}]+").unwrap());

/// Collapses all whitespace, newlines included, to single spaces.
pub fn normalize_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Tidies multi-line text: collapses runs of spaces, trims each line and drops
/// blank lines.
pub fn normalize_lines(text: &str) -> String {
    text.lines()
        .map(|line| INLINE_SPACE.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sleeps for a random duration in `range`.
pub fn random_delay(range: DelayRange) {
    let delay = pick_delay(range);
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}

pub fn pick_delay(range: DelayRange) -> Duration {
    if range.max_ms <= range.min_ms {
        return Duration::from_millis(range.min_ms);
    }
    Duration::from_millis(rand::rng().random_range(range.min_ms..=range.max_ms))
}

/// Sleeps unless `duration` is zero.
pub fn settle(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_whitespace_joins_lines() {
        assert_eq!(
            normalize_whitespace("  北京\n\t 上海   杭州 "),
            "北京 上海 杭州"
        );
    }

    #[test]
    fn normalize_lines_keeps_line_structure() {
        let raw = "\n  1. 负责  推荐系统\u{3000}研发 \n\n\n2. 参与架构设计\n  ";
        assert_eq!(normalize_lines(raw), "1. 负责 推荐系统 研发\n2. 参与架构设计");
    }

    #[test]
    fn pick_delay_stays_in_range() {
        let range = DelayRange {
            min_ms: 300,
            max_ms: 1600,
        };
        for _ in 0..50 {
            let delay = pick_delay(range);
            assert!(delay >= Duration::from_millis(300));
            assert!(delay <= Duration::from_millis(1600));
        }
        assert_eq!(pick_delay(DelayRange::NONE), Duration::ZERO);
    }
}
