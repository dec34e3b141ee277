use serde::Serialize;

use crate::dom::NodeId;
use crate::forms::{Bucket, Form};
use crate::http::Method;
use crate::session::Page;
use crate::text::clean;

#[derive(Debug, Clone, Serialize)]
pub struct PageSummary {
    pub url: String,
    pub status: u16,
    pub title: String,
    pub forms: Vec<FormSummary>,
    pub links: Vec<LinkSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FormSummary {
    pub name: String,
    pub method: Method,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub fields: Vec<FieldSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldSummary {
    pub kind: Bucket,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_text: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub checked: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionSummary {
    pub value: String,
    pub text: String,
    pub selected: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkSummary {
    pub href: String,
    pub text: String,
}

pub fn summarize(page: &Page) -> PageSummary {
    let links = page
        .links
        .iter()
        .filter_map(|&id| {
            let href = page.link_href(id)?;
            Some(LinkSummary {
                href: href.to_string(),
                text: clean(&page.document.text_content(id)),
            })
        })
        .collect();

    PageSummary {
        url: page.url.to_string(),
        status: page.status,
        title: page.title(),
        forms: page.forms.iter().map(summarize_form).collect(),
        links,
    }
}

pub fn summarize_form(form: &Form) -> FormSummary {
    FormSummary {
        name: form.name.clone(),
        method: form.method,
        action: form.action.clone(),
        fields: form
            .fields()
            .map(|(kind, id)| summarize_field(form, kind, id))
            .collect(),
    }
}

fn summarize_field(form: &Form, kind: Bucket, id: NodeId) -> FieldSummary {
    let value = match kind {
        Bucket::Textareas => form.textarea_text(id),
        Bucket::Selectboxes => None,
        _ => form.value(id),
    };
    let options = if kind == Bucket::Selectboxes {
        let doc = form.document();
        form.options(id)
            .iter()
            .map(|&opt| {
                let text = clean(&doc.text_content(opt));
                OptionSummary {
                    value: doc.attr(opt, "value").map_or_else(|| text.clone(), str::to_string),
                    selected: form.is_selected(opt),
                    text,
                }
            })
            .collect()
    } else {
        Vec::new()
    };

    FieldSummary {
        kind,
        name: form.field_name(id).map(str::to_string),
        value: value.map(str::to_string),
        label: form.label(id).filter(|l| !l.is_empty()),
        before_text: form.before_text(id).map(str::to_string),
        checked: matches!(kind, Bucket::Checkboxes | Bucket::Radioboxes) && form.is_checked(id),
        options,
    }
}

/// Render a summary as compact text.
///
/// Example output:
/// ```text
/// page: "Search" [http://music.example.com/] (200)
/// ---
/// form "search" GET -> /find.php:
///   textbox q "Artist:"
///   select type: [album] song
///   button go = "Search"
/// link "Pink Moon" -> album.php?id=7
/// ```
pub fn to_compact_text(summary: &PageSummary) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "page: \"{}\" [{}] ({})\n---\n",
        summary.title, summary.url, summary.status
    ));

    for form in &summary.forms {
        output.push_str(&format!("form \"{}\" {}", form.name, form.method));
        if let Some(action) = &form.action {
            output.push_str(&format!(" -> {action}"));
        }
        if form.fields.is_empty() {
            output.push('\n');
            continue;
        }
        output.push_str(":\n");
        for field in &form.fields {
            serialize_field(field, &mut output);
        }
    }

    for link in &summary.links {
        if link.text.is_empty() {
            output.push_str(&format!("link -> {}\n", link.href));
        } else {
            output.push_str(&format!("link \"{}\" -> {}\n", link.text, link.href));
        }
    }

    output
}

fn serialize_field(field: &FieldSummary, output: &mut String) {
    output.push_str(&format!("  {}", field.kind.as_str()));
    if let Some(name) = &field.name {
        output.push_str(&format!(" {name}"));
    }

    if let Some(val) = &field.value {
        if !val.is_empty() {
            output.push_str(&format!(" = \"{val}\""));
        }
    }

    // Prefer the label; fall back to the text in front of the field.
    if let Some(text) = field.label.as_ref().or(field.before_text.as_ref()) {
        output.push_str(&format!(" \"{text}\""));
    }

    if matches!(field.kind, Bucket::Checkboxes | Bucket::Radioboxes) {
        output.push_str(if field.checked { " [checked]" } else { " [unchecked]" });
    }

    if !field.options.is_empty() {
        output.push(':');
        for opt in &field.options {
            if opt.selected {
                output.push_str(&format!(" [{}]", opt.value));
            } else {
                output.push_str(&format!(" {}", opt.value));
            }
        }
    }
    output.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn page(markup: &str) -> Page {
        Page::new(
            Url::parse("http://music.example.com/").unwrap(),
            200,
            Vec::new(),
            markup.to_string(),
        )
    }

    #[test]
    fn summary_collects_forms_and_links() {
        let p = page(
            r#"<title>Search</title>
            <form name="search" action="/find.php">Artist: <input name="q">
              <select name="type"><option value="album" selected>Album</option><option>Song</option></select>
              <input type="submit" name="go" value="Search"></form>
            <a href="album.php?id=7"><b>Pink</b> Moon</a>"#,
        );
        let s = summarize(&p);
        assert_eq!(s.title, "Search");
        assert_eq!(s.forms.len(), 1);
        assert_eq!(s.links.len(), 1);
        assert_eq!(s.links[0].text, "Pink Moon");

        let form = &s.forms[0];
        let kinds: Vec<Bucket> = form.fields.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![Bucket::Buttons, Bucket::Textboxes, Bucket::Selectboxes]);
        let select = &form.fields[2];
        assert_eq!(select.options.len(), 2);
        assert!(select.options[0].selected);
        assert_eq!(select.options[1].value, "Song");
    }

    #[test]
    fn compact_text_layout() {
        let p = page(
            r#"<title>Search</title><form name="search" action="/find.php">Artist: <input name="q">
               <input type="checkbox" name="exact" checked></form>
               <a href="/help">Help</a>"#,
        );
        let text = to_compact_text(&summarize(&p));
        let expected = "\
page: \"Search\" [http://music.example.com/] (200)
---
form \"search\" GET -> /find.php:
  checkbox exact [checked]
  textbox q \"Artist:\"
link \"Help\" -> /help
";
        assert_eq!(text, expected);
    }

    #[test]
    fn json_skips_empty_parts() {
        let p = page(r#"<form><input type="hidden" name="sid" value="9"></form>"#);
        let json = serde_json::to_value(summarize(&p)).unwrap();
        let field = &json["forms"][0]["fields"][0];
        assert_eq!(field["kind"], "hidden");
        assert_eq!(field["value"], "9");
        assert!(field.get("checked").is_none());
        assert!(field.get("options").is_none());
        assert_eq!(json["forms"][0]["method"], "GET");
    }
}
