/// Blanks C comments and the contents of string/char literals so keyword
/// patterns only see real code. Quotes and newlines are kept and everything
/// removed becomes a space, so line structure is preserved.
pub fn sanitize(code: &str) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        Code,
        LineComment,
        BlockComment,
        Str,
        Char,
    }

    let mut out = String::with_capacity(code.len());
    let mut mode = Mode::Code;
    let mut chars = code.chars().peekable();

    while let Some(c) = chars.next() {
        match mode {
            Mode::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    out.push_str("  ");
                    mode = Mode::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str("  ");
                    mode = Mode::BlockComment;
                }
                '"' => {
                    out.push('"');
                    mode = Mode::Str;
                }
                '\'' => {
                    out.push('\'');
                    mode = Mode::Char;
                }
                _ => out.push(c),
            },
            Mode::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    mode = Mode::Code;
                } else {
                    out.push(' ');
                }
            }
            Mode::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    mode = Mode::Code;
                } else {
                    out.push(blank(c));
                }
            }
            Mode::Str | Mode::Char => {
                let close = if mode == Mode::Str { '"' } else { '\'' };
                if c == '\\' {
                    out.push(' ');
                    if let Some(escaped) = chars.next() {
                        out.push(blank(escaped));
                    }
                } else if c == close {
                    out.push(close);
                    mode = Mode::Code;
                } else if c == '\n' {
                    // Unterminated literal: C does not continue it past the line.
                    out.push('\n');
                    mode = Mode::Code;
                } else {
                    out.push(' ');
                }
            }
        }
    }

    out
}

fn blank(c: char) -> char {
    if c == '\n' {
        '\n'
    } else {
        ' '
    }
}
