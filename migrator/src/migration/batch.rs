// Batch splitting
//
// `GO` is not SQL; it's a client-side separator understood by sqlcmd/SSMS. Scripts are cut on
// lines that contain only `GO` (any case, surrounding whitespace allowed) and each remaining
// non-blank chunk is submitted on its own.

use std::fmt;

/// One independently submitted unit of SQL. `index` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub sql: String,
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch {}", self.index)
    }
}

fn is_delimiter(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("GO")
}

/// Split a script into trimmed, non-empty batches in source order. Never fails.
pub fn split(script: &str) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current = String::new();

    let mut flush = |current: &mut String| {
        let sql = current.trim();
        if !sql.is_empty() {
            let index = batches.len() + 1;
            batches.push(Batch {
                index,
                sql: sql.to_string(),
            });
        }
        current.clear();
    };

    for line in script.lines() {
        if is_delimiter(line) {
            flush(&mut current);
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    flush(&mut current);

    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql_of(batches: &[Batch]) -> Vec<&str> {
        batches.iter().map(|b| b.sql.as_str()).collect()
    }

    #[test]
    fn leading_delimiter_then_two_batches() {
        let batches = split("GO\nSELECT 1;\nGO\nSELECT 2;");
        assert_eq!(sql_of(&batches), vec!["SELECT 1;", "SELECT 2;"]);
        assert_eq!(batches[0].index, 1);
        assert_eq!(batches[1].index, 2);
    }

    #[test]
    fn no_delimiter_is_one_trimmed_batch() {
        let batches = split("SELECT 1;");
        assert_eq!(sql_of(&batches), vec!["SELECT 1;"]);

        let batches = split("\n\n  CREATE TABLE t (id INT);\n  INSERT INTO t VALUES (1);\n\n");
        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0].sql,
            "CREATE TABLE t (id INT);\n  INSERT INTO t VALUES (1);"
        );
    }

    #[test]
    fn duplicate_and_trailing_delimiters_produce_no_empty_batches() {
        let batches = split("GO\n\nGO\nSELECT 1;\nGO");
        assert_eq!(sql_of(&batches), vec!["SELECT 1;"]);
        assert_eq!(batches[0].index, 1);
    }

    #[test]
    fn delimiter_matching_is_case_insensitive_and_whitespace_tolerant() {
        let batches = split("SELECT 1;\n  go  \nSELECT 2;\r\nGo\r\nSELECT 3;\n\tgO\t\n");
        assert_eq!(sql_of(&batches), vec!["SELECT 1;", "SELECT 2;", "SELECT 3;"]);
    }

    #[test]
    fn go_inside_a_line_is_not_a_delimiter() {
        let script = "SELECT 'GO' AS word;\nGOTO label;\nGO 5\n-- GO\nSELECT 2;";
        let batches = split(script);
        assert_eq!(batches.len(), 1);
        assert!(batches[0].sql.contains("GOTO label;"));
        assert!(batches[0].sql.contains("GO 5"));
    }

    #[test]
    fn blank_and_delimiter_only_scripts_are_empty() {
        assert!(split("").is_empty());
        assert!(split("   \n\t\n").is_empty());
        assert!(split("GO\nGO\n  go\n").is_empty());
    }

    #[test]
    fn indices_are_contiguous_after_skipping_empty_chunks() {
        let batches = split("A;\nGO\n\nGO\nB;\nGO\n   \nGO\nC;");
        let indices: Vec<usize> = batches.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(sql_of(&batches), vec!["A;", "B;", "C;"]);
    }
}
