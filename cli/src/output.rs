use colored::Colorize;

pub fn header(title: &str) {
    println!("{}", title.bold().underline());
}

pub fn hint(msg: &str) {
    println!("{} {}", "hint:".cyan().bold(), msg.dimmed());
}

pub fn warn(msg: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), msg);
}

/// One `key = value` row, key aligned to `width`.
pub fn entry(key: &str, value: &str, width: usize) {
    println!("  {:<width$}  {}", key.cyan(), value);
}
