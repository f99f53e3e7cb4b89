/// Whether every `(` and `{` in the input has been closed, ignoring `//`
/// comments. Over-closed input counts as balanced so the parser reports it.
pub fn parens_balanced(input: &str) -> bool {
    let mut depth = 0i32;
    for line in input.lines() {
        let code = match line.find("//") {
            Some(i) => &line[..i],
            None => line,
        };
        for ch in code.chars() {
            match ch {
                '(' | '{' => depth += 1,
                ')' | '}' => depth -= 1,
                _ => {}
            }
        }
    }
    depth <= 0
}
