//! # Portal Page
//!
//! The HTML index a client lands on: connected devices, their remaining
//! time, and a top-up form per device that posts to `/add_time`.

use super::types::DeviceJson;
use pisowifi_core::Tariff;
use std::fmt::Write as _;

/// Render the portal index.
///
/// `devices` is `None` when the access point could not be polled.
pub fn render_index(devices: Option<&[DeviceJson]>, tariff: &Tariff) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "<!DOCTYPE html>");
    let _ = writeln!(out, "<html lang=\"en\">");
    let _ = writeln!(out, "<head>");
    let _ = writeln!(out, "<meta charset=\"utf-8\">");
    let _ = writeln!(
        out,
        "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">"
    );
    let _ = writeln!(out, "<title>PisoWiFi</title>");
    let _ = writeln!(out, "</head>");
    let _ = writeln!(out, "<body>");
    let _ = writeln!(out, "<h1>PisoWiFi</h1>");
    let _ = writeln!(
        out,
        "<p>1 peso = {} minute(s) of internet access.</p>",
        tariff.minutes_per_peso
    );

    match devices {
        None => {
            let _ = writeln!(out, "<p>Device list unavailable. Please try again.</p>");
        }
        Some([]) => {
            let _ = writeln!(out, "<p>No devices connected.</p>");
        }
        Some(devices) => {
            let _ = writeln!(out, "<table>");
            let _ = writeln!(
                out,
                "<tr><th>Device</th><th>Time left</th><th>Status</th><th>Add time</th></tr>"
            );
            for device in devices {
                let _ = writeln!(
                    out,
                    "<tr><td>{mac}</td><td>{mins} min</td><td>{status}</td><td>\
                     <form method=\"post\" action=\"/add_time\">\
                     <input type=\"hidden\" name=\"mac_address\" value=\"{mac}\">\
                     <input type=\"number\" name=\"amount\" min=\"1\" max=\"{max}\" value=\"1\">\
                     <button type=\"submit\">Insert coins</button>\
                     </form></td></tr>",
                    mac = device.mac_address,
                    mins = device.balance_minutes,
                    status = device.status,
                    max = tariff.max_amount,
                );
            }
            let _ = writeln!(out, "</table>");
        }
    }

    let _ = writeln!(out, "</body>");
    let _ = writeln!(out, "</html>");
    out
}
