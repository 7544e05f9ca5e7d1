//! QR code display.

use qrcode::render::unicode::Dense1x2;
use qrcode::QrCode;

/// Print a QR code to the terminal, two modules per character.
///
/// Colors are inverted so the code reads on dark terminals.
pub fn print_qr_code(data: &str) {
    let code = match QrCode::new(data.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to generate QR code: {}", e);
            return;
        }
    };

    let image = code
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build();

    for line in image.lines() {
        println!("  {}", line);
    }
}
