//! UI utilities for terminal output.

mod banner;
mod qr;

pub use banner::{print_banner, print_status};
pub use qr::print_qr_code;
