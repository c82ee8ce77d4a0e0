//! Renders the configuration document handed to the bus daemon.

use std::path::Path;

/// Renders a session-bus configuration that listens on `listen` and searches
/// `service_dirs` for activatable services, in order.
///
/// The policy allows everything: the bus only ever serves a single test.
#[must_use]
pub fn render(listen: &str, service_dirs: &[impl AsRef<Path>]) -> String {
    let mut document = String::from("<busconfig>\n  <type>session</type>\n");
    push_element(&mut document, "listen", listen);
    for dir in service_dirs {
        push_element(&mut document, "servicedir", &dir.as_ref().to_string_lossy());
    }
    document.push_str(concat!(
        "  <policy context=\"default\">\n",
        "    <allow send_destination=\"*\" eavesdrop=\"true\"/>\n",
        "    <allow eavesdrop=\"true\"/>\n",
        "    <allow own=\"*\"/>\n",
        "  </policy>\n",
        "</busconfig>\n",
    ));
    document
}

fn push_element(document: &mut String, name: &str, text: &str) {
    document.push_str("  <");
    document.push_str(name);
    document.push('>');
    push_escaped(document, text);
    document.push_str("</");
    document.push_str(name);
    document.push_str(">\n");
}

fn push_escaped(document: &mut String, text: &str) {
    for character in text.chars() {
        match character {
            '&' => document.push_str("&amp;"),
            '<' => document.push_str("&lt;"),
            '>' => document.push_str("&gt;"),
            '"' => document.push_str("&quot;"),
            '\'' => document.push_str("&apos;"),
            other => document.push(other),
        }
    }
}
