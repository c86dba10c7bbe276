//! LRC lyrics parsing and time lookup.

use std::sync::LazyLock;

use regex::Regex;

// [mm:ss], [mm:ss.x], [mm:ss.xx], [mm:ss.xxx] and [mm:ss:xx].
static TIME_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d{1,2}):(\d{2})(?:[.:]?(\d{1,3}))?\]").expect("time tag regex")
});

/// One timed lyric line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LyricLine {
    pub time_ms: u64,
    pub text: String,
}

/// Parse LRC text into lines sorted by time.
///
/// A line carrying several time tags yields one entry per tag. The text is
/// whatever follows the last tag; lines with no text are dropped.
pub fn parse_lrc(content: &str) -> Vec<LyricLine> {
    let mut lines = Vec::new();
    for raw in content.lines() {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let mut times = Vec::new();
        let mut last_end = 0;
        for caps in TIME_TAG.captures_iter(raw) {
            let minutes: u64 = caps[1].parse().unwrap_or(0);
            let seconds: u64 = caps[2].parse().unwrap_or(0);
            let millis = caps.get(3).map_or(0, |m| fraction_ms(m.as_str()));
            times.push(minutes * 60_000 + seconds * 1000 + millis);
            if let Some(whole) = caps.get(0) {
                last_end = whole.end();
            }
        }

        let text = raw[last_end..].trim();
        if times.is_empty() || text.is_empty() {
            continue;
        }
        lines.extend(times.into_iter().map(|time_ms| LyricLine {
            time_ms,
            text: text.to_string(),
        }));
    }
    lines.sort_by_key(|l| l.time_ms);
    lines
}

/// Fractional part scaled by digit count: "5" is 500 ms, "25" is 250 ms.
fn fraction_ms(digits: &str) -> u64 {
    let value: u64 = digits.parse().unwrap_or(0);
    match digits.len() {
        1 => value * 100,
        2 => value * 10,
        _ => value,
    }
}

/// Parsed lyrics for the current track.
#[derive(Clone, Debug, Default)]
pub struct Lyrics {
    lines: Vec<LyricLine>,
}

impl Lyrics {
    pub fn parse(content: &str) -> Self {
        Self {
            lines: parse_lrc(content),
        }
    }

    pub fn lines(&self) -> &[LyricLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Index of the last line starting at or before `ms`.
    pub fn current_index(&self, ms: u64) -> Option<usize> {
        let after = self.lines.partition_point(|l| l.time_ms <= ms);
        after.checked_sub(1)
    }

    /// Text of the active line, or `""` before the first one.
    pub fn current_line(&self, ms: u64) -> &str {
        self.current_index(ms)
            .map_or("", |i| self.lines[i].text.as_str())
    }

    /// Active line and the one after it; either may be `""`.
    pub fn current_and_next(&self, ms: u64) -> (&str, &str) {
        let idx = self.current_index(ms);
        let current = idx.map_or("", |i| self.lines[i].text.as_str());
        let next_idx = idx.map_or(0, |i| i + 1);
        let next = self
            .lines
            .get(next_idx)
            .map_or("", |l| l.text.as_str());
        (current, next)
    }
}
