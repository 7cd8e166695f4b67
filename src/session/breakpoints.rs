//! Breakpoint verification and bookkeeping
//!
//! A requested line is moved forward past blank and comment lines to the
//! first line that can hold a breakpoint. Every `setBreakpoints` request
//! replaces the whole set recorded for its file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::dap::protocol::{Breakpoint, SourceBreakpoint};

/// First id handed out to a breakpoint
pub const FIRST_BREAKPOINT_ID: i64 = 1000;

const COMMENT_MARKER: &str = "#";

/// First line at or after `requested` (1-based) that is neither blank nor a
/// comment; `None` when the scan runs past the end of the file
pub fn verify_line(lines: &[&str], requested: u32) -> Option<u32> {
    let start = requested.max(1) as usize;
    (start..=lines.len())
        .find(|&number| {
            let text = lines[number - 1].trim();
            !text.is_empty() && !text.starts_with(COMMENT_MARKER)
        })
        .map(|number| number as u32)
}

/// A breakpoint as recorded for a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBreakpoint {
    pub id: i64,
    /// Verified line, or the requested line when unverified
    pub line: u32,
    pub verified: bool,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
}

impl PlannedBreakpoint {
    pub fn to_dap(&self) -> Breakpoint {
        Breakpoint {
            id: self.id,
            verified: self.verified,
            line: self.line,
        }
    }
}

#[derive(Debug)]
pub struct BreakpointManager {
    next_id: i64,
    by_file: HashMap<PathBuf, Vec<PlannedBreakpoint>>,
}

impl Default for BreakpointManager {
    fn default() -> Self {
        Self {
            next_id: FIRST_BREAKPOINT_ID,
            by_file: HashMap::new(),
        }
    }
}

impl BreakpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify `requested` against `source_text` and make the result the
    /// breakpoint set of `path`
    pub fn replace(
        &mut self,
        path: &Path,
        source_text: &str,
        requested: &[SourceBreakpoint],
    ) -> Vec<PlannedBreakpoint> {
        let lines: Vec<&str> = source_text.lines().collect();
        let planned: Vec<PlannedBreakpoint> = requested
            .iter()
            .map(|breakpoint| {
                let verified = verify_line(&lines, breakpoint.line);
                let id = self.next_id;
                self.next_id += 1;
                PlannedBreakpoint {
                    id,
                    line: verified.unwrap_or(breakpoint.line),
                    verified: verified.is_some(),
                    condition: breakpoint.condition.clone().filter(|c| !c.is_empty()),
                    hit_condition: breakpoint.hit_condition.clone().filter(|c| !c.is_empty()),
                }
            })
            .collect();

        self.by_file.insert(path.to_path_buf(), planned.clone());
        planned
    }

    pub fn for_file(&self, path: &Path) -> &[PlannedBreakpoint] {
        self.by_file.get(path).map(Vec::as_slice).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requested(lines: &[u32]) -> Vec<SourceBreakpoint> {
        lines
            .iter()
            .map(|&line| SourceBreakpoint {
                line,
                condition: None,
                hit_condition: None,
            })
            .collect()
    }

    #[test]
    fn test_verify_line_skips_blank_and_comment_lines() {
        let lines = ["", "# comment", "x = 1", "y = 2"];
        assert_eq!(verify_line(&lines, 1), Some(3));
        assert_eq!(verify_line(&lines, 4), Some(4));
        assert_eq!(verify_line(&lines, 5), None);
    }

    #[test]
    fn test_verify_line_trims_and_runs_off_the_end() {
        let lines = ["def f():", "    return 1", "    ", "    # trailing"];
        assert_eq!(verify_line(&lines, 2), Some(2));
        assert_eq!(verify_line(&lines, 3), None);
        assert_eq!(verify_line(&lines, 0), Some(1));
    }

    #[test]
    fn test_replace_assigns_increasing_ids_and_replaces() {
        let mut manager = BreakpointManager::new();
        let path = Path::new("/src/app.py");
        let text = "\n# setup\nx = 1\ny = 2\n";

        let first = manager.replace(path, text, &requested(&[1, 9]));
        assert_eq!(
            first.iter().map(PlannedBreakpoint::to_dap).collect::<Vec<_>>(),
            vec![
                Breakpoint { id: 1000, verified: true, line: 3 },
                Breakpoint { id: 1001, verified: false, line: 9 },
            ]
        );

        let second = manager.replace(path, text, &requested(&[4]));
        assert_eq!(second[0].id, 1002);
        assert_eq!(manager.for_file(path), second.as_slice());

        let other = manager.replace(Path::new("/src/other.py"), "pass\n", &requested(&[1]));
        assert_eq!(other[0].id, 1003);
        assert_eq!(manager.for_file(path).len(), 1);
        assert!(manager.for_file(Path::new("/src/none.py")).is_empty());
    }

    #[test]
    fn test_conditions_are_kept() {
        let mut manager = BreakpointManager::new();
        let breakpoints = vec![SourceBreakpoint {
            line: 1,
            condition: Some("x > 3".to_string()),
            hit_condition: Some("".to_string()),
        }];
        let planned = manager.replace(Path::new("a.py"), "x = 5\n", &breakpoints);
        assert_eq!(planned[0].condition.as_deref(), Some("x > 3"));
        assert_eq!(planned[0].hit_condition, None);
    }
}
