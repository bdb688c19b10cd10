use std::io::{self, Write};

use crate::modules::auth::password::read_password;

/// Helper function to read a line from stdin
pub fn read_line() -> io::Result<String> {
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

/// Print a label and read one line of input
pub fn prompt(label: &str) -> io::Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    read_line()
}

/// Print a label and read a secret without echo
pub fn prompt_secret(label: &str) -> io::Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    read_password()
}

/// Read a new secret twice; `None` when the entries differ
pub fn prompt_new_secret(label: &str) -> io::Result<Option<String>> {
    let first = prompt_secret(label)?;
    let second = prompt_secret(&format!("Confirm {}", label.to_lowercase()))?;
    Ok(if first == second { Some(first) } else { None })
}

/// Split a comma or space separated answer into distinct entries, in order
pub fn parse_choices(input: &str) -> Vec<String> {
    let mut choices: Vec<String> = Vec::new();
    for choice in input
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        let choice = choice.to_lowercase();
        if !choices.contains(&choice) {
            choices.push(choice);
        }
    }
    choices
}
