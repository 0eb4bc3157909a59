pub const LINE_WIDTH: usize = 60;

fn complement(base: char) -> char {
    match base {
        'A' => 'T',
        'T' => 'A',
        'C' => 'G',
        'G' => 'C',
        'a' => 't',
        't' => 'a',
        'c' => 'g',
        'g' => 'c',
        other => other,
    }
}

/// Reverse complement, case preserving. Anything outside `ACGTacgt` (N, IUPAC
/// codes, gaps) is kept as is.
pub fn reverse_complement(seq: &str) -> String {
    seq.chars().rev().map(complement).collect()
}

/// Splits `seq` into lines of `width` characters. A width of 0 is treated as 1.
pub fn wrap(seq: &str, width: usize) -> String {
    let width = width.max(1);
    let mut out = String::with_capacity(seq.len() + seq.len() / width);
    for (idx, ch) in seq.chars().enumerate() {
        if idx > 0 && idx % width == 0 {
            out.push('\n');
        }
        out.push(ch);
    }
    out
}

/// Keeps sequence characters only, dropping whitespace, digits and markup noise.
pub fn clean(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_alphabetic).collect()
}
