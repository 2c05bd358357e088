use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

fn url_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(
      r#"(?i)\b(?:[a-z][a-z0-9+.\-]*://|www\d{0,3}\.|[a-z0-9.\-]+\.[a-z]{2,4}/)[^\s"'<>]+"#,
    )
    .expect("valid url regex")
  })
}

/// Truncate the query string of every URL in `line` to `?...`.
pub fn scrub_urls(line: &str) -> Cow<'_, str> {
  url_re().replace_all(line, |caps: &regex::Captures<'_>| {
    let url = &caps[0];
    match url.find('?') {
      Some(i) => format!("{}?...", &url[..i]),
      None => url.to_string(),
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn truncates_query_strings() {
    let line = r#"{"url":"https://example.com/stream?token=secret"}"#;
    assert_eq!(scrub_urls(line), r#"{"url":"https://example.com/stream?..."}"#);
  }

  #[test]
  fn leaves_urls_without_query_alone() {
    let line = "posting to http://localhost:5001/streams/1/2/3 now";
    assert_eq!(scrub_urls(line), line);
  }

  #[test]
  fn scrubs_every_url_on_the_line() {
    let line = "a=http://a.example/x?k=1 b=www.example.com/y?k=2 c=example.org/z?k=3";
    let out = scrub_urls(line);
    assert!(!out.contains("k=1"));
    assert!(!out.contains("k=2"));
    assert!(!out.contains("k=3"));
    assert_eq!(
      out,
      "a=http://a.example/x?... b=www.example.com/y?... c=example.org/z?..."
    );
  }

  #[test]
  fn plain_text_is_untouched() {
    assert_eq!(scrub_urls("no links here? none"), "no links here? none");
  }
}
