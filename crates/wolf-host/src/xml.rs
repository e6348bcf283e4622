//! Minimal hand-built XML responses. Every Moonlight response is a single
//! `root` element with a `status_code` attribute and a fixed set of child
//! elements the client parses positionally — not worth pulling in a
//! general-purpose XML writer for.

use std::fmt::Write;

pub struct XmlBuilder {
    status_code: u32,
    body: String,
}

impl XmlBuilder {
    pub fn new(status_code: u32) -> Self {
        Self { status_code, body: String::new() }
    }

    pub fn element(mut self, name: &str, value: impl std::fmt::Display) -> Self {
        let _ = write!(self.body, "<{name}>{}</{name}>", escape(&value.to_string()));
        self
    }

    pub fn raw(mut self, fragment: &str) -> Self {
        self.body.push_str(fragment);
        self
    }

    pub fn finish(self) -> String {
        format!(r#"<?xml version="1.0" encoding="utf-8"?><root status_code="{}">{}</root>"#, self.status_code, self.body)
    }
}

fn escape(value: &str) -> String {
    value.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

pub fn display_mode_xml(width: u32, height: u32, refresh_rate: u32) -> String {
    format!("<DisplayMode><Width>{width}</Width><Height>{height}</Height><RefreshRate>{refresh_rate}</RefreshRate></DisplayMode>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_simple_root() {
        let xml = XmlBuilder::new(200).element("hostname", "wolf").finish();
        assert_eq!(xml, r#"<?xml version="1.0" encoding="utf-8"?><root status_code="200"><hostname>wolf</hostname></root>"#);
    }

    #[test]
    fn escapes_reserved_characters() {
        let xml = XmlBuilder::new(200).element("currentgame", "A & B").finish();
        assert!(xml.contains("A &amp; B"));
    }
}
