/// One parsed input line: pipeline stages plus the background marker.
///
/// Tokens are contiguous runs of non-whitespace. There is no quoting, no
/// escaping and no expansion; stages that are empty after tokenizing are
/// dropped, so a line like `|` or `&` parses to an empty pipeline that the
/// caller treats as a no-op.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    /// argv per stage, in pipeline order. Every entry is non-empty.
    pub stages: Vec<Vec<String>>,
    /// True when the trimmed line ended with `&`.
    pub background: bool,
    /// The trimmed line with a trailing `&` stripped; used for job reports.
    pub command: String,
}

/// Split a line into pipeline stages and a background flag.
pub fn parse(line: &str) -> Pipeline {
    let mut rest = line.trim();

    let mut background = false;
    if let Some(stripped) = rest.strip_suffix('&') {
        background = true;
        rest = stripped.trim();
    }

    let stages = rest
        .split('|')
        .map(|stage| {
            stage
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|argv| !argv.is_empty())
        .collect();

    Pipeline {
        stages,
        background,
        command: rest.to_string(),
    }
}
