//! Terminal QR code for owner login.

use std::io::{self, Write};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use crossterm::cursor::MoveTo;
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType};
use qrcode::QrCode;
use qrcode::render::unicode;

/// Builds the `tg://login` URL for a login token.
#[must_use]
pub fn login_url(token: &[u8]) -> String {
    format!("tg://login?token={}", URL_SAFE.encode(token))
}

/// Renders a URL as a QR code made of half-block characters.
pub fn render_qr(url: &str) -> Result<String, qrcode::types::QrError> {
    let code = QrCode::new(url.as_bytes())?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

/// Clears the terminal and prints the QR code with instructions.
pub fn show_login_qr(url: &str, expires_in_secs: i64) -> io::Result<()> {
    let qr = render_qr(url).map_err(|e| io::Error::other(e.to_string()))?;

    let mut stdout = io::stdout();
    execute!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;
    writeln!(stdout, "{qr}")?;
    writeln!(stdout, "Scan with Telegram: Settings → Devices → Link Desktop Device")?;
    writeln!(stdout, "Code refreshes in {expires_in_secs}s")?;
    stdout.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_url_is_url_safe() {
        let url = login_url(&[0xfb, 0xff, 0x01]);
        assert!(url.starts_with("tg://login?token="));
        assert!(!url.contains('+'));
        assert_eq!(url, "tg://login?token=-_8B");
    }

    #[test]
    fn test_render_qr_produces_blocks() {
        let qr = render_qr("tg://login?token=abc").unwrap();
        assert!(qr.lines().count() > 10);
    }
}
