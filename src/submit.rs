//! Turning a filled-in form into the request a browser would send.

use url::form_urlencoded::byte_serialize;
use url::Url;

use crate::dom::NodeId;
use crate::error::{BrowseError, Result};
use crate::forms::{Bucket, Form};
use crate::http::{Method, Request};

/// A name with an optional value; `None` and `""` both serialize as the bare name.
pub type Pair = (String, Option<String>);

/// Collect the pairs a submission carries, in submission order.
pub fn collect_pairs(form: &Form, button: Option<NodeId>) -> Vec<Pair> {
    let mut pairs: Vec<Pair> = Vec::new();
    let named = move |id: NodeId| form.field_name(id).filter(|n| !n.is_empty());

    if let Some(button) = button {
        if let Some(name) = named(button) {
            pairs.push((name.to_string(), form.value(button).map(str::to_string)));
        }
    }

    for &id in form.bucket(Bucket::Hidden) {
        if let Some(name) = named(id) {
            pairs.push((name.to_string(), form.value(id).map(str::to_string)));
        }
    }

    let checkable = form
        .bucket(Bucket::Checkboxes)
        .iter()
        .chain(form.bucket(Bucket::Radioboxes));
    for &id in checkable {
        if !form.is_checked(id) {
            continue;
        }
        if let Some(name) = named(id) {
            pairs.push((name.to_string(), form.value(id).map(str::to_string)));
        }
    }

    for &id in form.bucket(Bucket::Textboxes) {
        if let Some(name) = named(id) {
            pairs.push((name.to_string(), form.value(id).map(str::to_string)));
        }
    }

    for &id in form.bucket(Bucket::Selectboxes) {
        if let Some(name) = named(id) {
            for value in form.selected_values(id) {
                pairs.push((name.to_string(), Some(value)));
            }
        }
    }

    for &id in form.bucket(Bucket::Textareas) {
        if let Some(name) = named(id) {
            pairs.push((name.to_string(), form.textarea_text(id).map(str::to_string)));
        }
    }

    pairs
}

fn encode(s: &str) -> String {
    byte_serialize(s.as_bytes()).collect()
}

/// `application/x-www-form-urlencoded` string with each key and value encoded on its own.
pub fn encode_pairs(pairs: &[Pair]) -> String {
    pairs
        .iter()
        .map(|(key, value)| match value.as_deref() {
            Some(v) if !v.is_empty() => format!("{}={}", encode(key), encode(v)),
            _ => encode(key),
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Target of a form: its action resolved against `base`, or `base` itself.
pub fn action_url(form: &Form, base: &Url) -> Result<Url> {
    match form.action.as_deref() {
        Some(action) => base.join(action).map_err(|source| BrowseError::InvalidUrl {
            url: action.to_string(),
            source,
        }),
        None => Ok(base.clone()),
    }
}

/// Build the request for submitting `form` through `button`.
pub fn build_submission(form: &Form, button: Option<NodeId>, base: &Url) -> Result<Request> {
    let encoded = encode_pairs(&collect_pairs(form, button));
    let mut target = action_url(form, base)?;
    target.set_fragment(None);

    Ok(match form.method {
        Method::Post => Request::post_form(target, encoded),
        Method::Get => {
            target.set_query(if encoded.is_empty() {
                None
            } else {
                Some(encoded.as_str())
            });
            Request::get(target)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::build_forms;

    fn base() -> Url {
        Url::parse("http://music.example.com/dir/page.html").unwrap()
    }

    fn form(markup: &str) -> Form {
        build_forms(markup).iter().next().unwrap().clone()
    }

    #[test]
    fn pair_order_follows_buckets() {
        let f = form(
            r#"<form action="/s">
                <textarea name="t">notes</textarea>
                <select name="sel"><option value="v" selected>V</option></select>
                <input name="text" value="abc">
                <input type="checkbox" name="cb" value="on1" checked>
                <input type="hidden" name="h" value="1">
                <input type="submit" name="go" value="Go">
            </form>"#,
        );
        let button = f.find_button("Go");
        let keys: Vec<String> = collect_pairs(&f, button).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["go", "h", "cb", "text", "sel", "t"]);
    }

    #[test]
    fn unchecked_boxes_and_nameless_fields_skipped() {
        let f = form(
            r#"<form><input type="checkbox" name="a"><input value="orphan"><input type="radio" name="r" value="1"></form>"#,
        );
        assert!(collect_pairs(&f, None).is_empty());
    }

    #[test]
    fn unnamed_button_adds_nothing() {
        let f = form(r#"<form><input type="submit" value="Go"><input type="hidden" name="h" value="1"></form>"#);
        let pairs = collect_pairs(&f, f.find_button("Go"));
        assert_eq!(pairs, vec![("h".to_string(), Some("1".to_string()))]);
    }

    #[test]
    fn empty_value_is_bare_key() {
        let pairs = vec![
            ("a".to_string(), None),
            ("b".to_string(), Some(String::new())),
            ("c".to_string(), Some("3".to_string())),
        ];
        assert_eq!(encode_pairs(&pairs), "a&b&c=3");
    }

    #[test]
    fn keys_and_values_percent_encoded() {
        let pairs = vec![("artist name".to_string(), Some("Simon & Garfunkel=1".to_string()))];
        assert_eq!(encode_pairs(&pairs), "artist+name=Simon+%26+Garfunkel%3D1");
    }

    #[test]
    fn get_puts_pairs_in_query() {
        let f = form(r#"<form action="search.php?old=1#top"><input name="q" value="Abbey Road"></form>"#);
        let req = build_submission(&f, None, &base()).unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(
            req.url.as_str(),
            "http://music.example.com/dir/search.php?q=Abbey+Road"
        );
        assert!(req.body.is_none());
    }

    #[test]
    fn get_without_action_targets_current_location() {
        let f = form(r#"<form><input name="q" value="x"></form>"#);
        let req = build_submission(&f, None, &base()).unwrap();
        assert_eq!(req.url.as_str(), "http://music.example.com/dir/page.html?q=x");
    }

    #[test]
    fn post_carries_body_and_headers() {
        let f = form(
            r#"<form method="POST" action="/cgi/find"><input type="hidden" name="sql" value="11:abc"><input name="q" value="Nick Drake"></form>"#,
        );
        let req = build_submission(&f, None, &base()).unwrap();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.url.as_str(), "http://music.example.com/cgi/find");
        let body = req.body.as_deref().unwrap();
        assert_eq!(body, "sql=11%3Aabc&q=Nick+Drake");
        assert_eq!(req.header("content-type"), Some("application/x-www-form-urlencoded"));
        assert_eq!(req.header("content-length"), Some(body.len().to_string().as_str()));
    }
}
