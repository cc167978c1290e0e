//! CSV → markdown table adapter.
//!
//! Applied to uploads and published sheets before they enter the store, so the model sees
//! explicit rows and columns. The selector never calls this.

/// Renders CSV text as a markdown table.
///
/// The first non-blank line is the header. Data rows split on commas outside double quotes;
/// short rows are padded with empty cells. Blank input renders as an empty string.
pub fn csv_to_markdown_table(csv: &str) -> String {
    let mut lines = csv.lines().filter(|line| !line.trim().is_empty());
    let Some(header_line) = lines.next() else {
        return String::new();
    };

    let headers: Vec<&str> = header_line.split(',').map(str::trim).collect();
    let separator = vec!["---"; headers.len()];
    let mut md = format!("| {} |\n| {} |", headers.join(" | "), separator.join(" | "));

    for line in lines {
        let mut cells: Vec<String> = split_quoted(line)
            .into_iter()
            .map(|cell| strip_outer_quotes(cell.trim()).to_string())
            .collect();
        while cells.len() < headers.len() {
            cells.push(String::new());
        }
        md.push_str("\n| ");
        md.push_str(&cells.join(" | "));
        md.push_str(" |");
    }

    md
}

/// Splits on commas that are not inside a double-quoted section.
fn split_quoted(line: &str) -> Vec<&str> {
    let mut cells = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                cells.push(&line[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    cells.push(&line[start..]);
    cells
}

fn strip_outer_quotes(cell: &str) -> &str {
    let cell = cell.strip_prefix('"').unwrap_or(cell);
    cell.strip_suffix('"').unwrap_or(cell)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_header_separator_and_rows() {
        let csv = "Producto,Precio\nYerba,$3800\r\nLeche,$1400\n";
        assert_eq!(
            csv_to_markdown_table(csv),
            "| Producto | Precio |\n| --- | --- |\n| Yerba | $3800 |\n| Leche | $1400 |"
        );
    }

    #[test]
    fn keeps_commas_inside_quotes() {
        let csv = "Producto,Notas\n\"Queso, cremoso\", \"El kg\"";
        assert_eq!(
            csv_to_markdown_table(csv),
            "| Producto | Notas |\n| --- | --- |\n| Queso, cremoso | El kg |"
        );
    }

    #[test]
    fn pads_short_rows_and_skips_blank_lines() {
        let csv = "\n  \nA,B,C\n\n1\n1,2,3,4\n";
        assert_eq!(
            csv_to_markdown_table(csv),
            "| A | B | C |\n| --- | --- | --- |\n| 1 |  |  |\n| 1 | 2 | 3 | 4 |"
        );
    }

    #[test]
    fn blank_input_is_empty() {
        assert_eq!(csv_to_markdown_table(""), "");
        assert_eq!(csv_to_markdown_table(" \n\r\n "), "");
    }

    #[test]
    fn header_only_renders_table_shell() {
        assert_eq!(csv_to_markdown_table("A, B"), "| A | B |\n| --- | --- |");
    }
}
