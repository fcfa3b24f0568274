use console::{Emoji, style};

use super::qr;

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static PHONE: Emoji<'_, '_> = Emoji("📱 ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_link(label: &str, url: &str) {
    println!(
        "  {} {}: {}",
        GLOBE,
        style(label).bold(),
        style(url).underlined().cyan()
    );
}

/// Titled block of help text.
pub struct GuideSection {
    title: String,
    lines: Vec<String>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.lines.push(format!(
            "  {:<12} {}",
            style(name).green().bold(),
            description
        ));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.lines.push(format!("  {}", text));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(String::new());
        self
    }

    pub fn print(&self) {
        println!("\n {}", style(&self.title).bold().underlined());
        for line in &self.lines {
            println!("{}", line);
        }
    }
}

/// Print a scannable login code. Falls back to the raw payload if it does
/// not encode.
pub fn print_qr(payload: &str) {
    println!(
        "\n{} {}",
        PHONE,
        style("Scan this code with the phone linked to the bot account:").bold()
    );
    match qr::render_terminal(payload) {
        Ok(code) => println!("{}", code),
        Err(e) => {
            print_warn(&format!("Could not render QR code ({}). Raw payload:", e));
            println!("{}", payload);
        }
    }
}

pub fn print_banner() {
    let lines: &[&str] = &[
        "             _ _ _           _   ",
        " _ __   ___ | | | |__   ___ | |_ ",
        "| '_ \\ / _ \\| | | '_ \\ / _ \\| __|",
        "| |_) | (_) | | | |_) | (_) | |_ ",
        "| .__/ \\___/|_|_|_.__/ \\___/ \\__|",
        "|_|                              ",
    ];

    // Gradient: #34d399 → #22d3ee (left → right)
    let from = (52u8, 211u8, 153u8);
    let to = (34u8, 211u8, 238u8);
    let max_w = 33u32;

    println!();
    for line in lines {
        for (x, ch) in line.chars().enumerate() {
            if ch == ' ' {
                print!(" ");
                continue;
            }
            let t = (x as u32 * 1000 / max_w).min(1000);
            let (r, g, b) = lerp_color(from, to, t);
            print!("\x1b[38;2;{};{};{}m{}", r, g, b, ch);
        }
        println!();
    }
    print!("\x1b[0m");

    println!("\x1b[38;2;34;211;238mThe daily poll, on time.\x1b[0m\n");
}

fn lerp_color(a: (u8, u8, u8), b: (u8, u8, u8), t: u32) -> (u8, u8, u8) {
    let r = (a.0 as u32 * (1000 - t) + b.0 as u32 * t) / 1000;
    let g = (a.1 as u32 * (1000 - t) + b.1 as u32 * t) / 1000;
    let b_val = (a.2 as u32 * (1000 - t) + b.2 as u32 * t) / 1000;
    (r as u8, g as u8, b_val as u8)
}

pub fn print_goodbye() {
    println!("\n{} {}", SPARKLE, style("pollbot stopped.").bold().cyan());
}
