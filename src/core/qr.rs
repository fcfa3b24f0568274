use qrcode::QrCode;
use qrcode::render::{svg, unicode};

use super::error::BotError;

fn encode(payload: &str) -> Result<QrCode, BotError> {
    QrCode::new(payload.as_bytes()).map_err(|e| BotError::Client(format!("bad QR payload: {}", e)))
}

/// Two rows per line, light-on-dark so it scans from a dark terminal.
pub fn render_terminal(payload: &str) -> Result<String, BotError> {
    let code = encode(payload)?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}

pub fn render_svg(payload: &str) -> Result<String, BotError> {
    let code = encode(payload)?;
    Ok(code
        .render()
        .min_dimensions(256, 256)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build())
}
