use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::dom::{Document, Element, Matcher, NodeId};
use crate::error::{BrowseError, Result};
use crate::http::Method;
use crate::text::clean;

/// Category an interactive element is filed under when its form is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Buttons,
    Hidden,
    Checkboxes,
    Textboxes,
    Radioboxes,
    Selectboxes,
    Textareas,
}

impl Bucket {
    pub const ALL: [Bucket; 7] = [
        Bucket::Buttons,
        Bucket::Hidden,
        Bucket::Checkboxes,
        Bucket::Textboxes,
        Bucket::Radioboxes,
        Bucket::Selectboxes,
        Bucket::Textareas,
    ];

    /// Bucket for an element, decided by tag and `type` alone.
    pub fn classify(el: &Element) -> Option<Bucket> {
        match el.tag.as_str() {
            "input" => {
                let kind = el.attr("type").unwrap_or("text").trim().to_ascii_lowercase();
                match kind.as_str() {
                    "submit" | "image" => Some(Bucket::Buttons),
                    "hidden" => Some(Bucket::Hidden),
                    "checkbox" => Some(Bucket::Checkboxes),
                    "text" | "textfield" | "password" => Some(Bucket::Textboxes),
                    "radio" => Some(Bucket::Radioboxes),
                    _ => None,
                }
            }
            "button" => match el.attr("type").map(|t| t.trim().to_ascii_lowercase()) {
                None => Some(Bucket::Buttons),
                Some(t) if t == "submit" => Some(Bucket::Buttons),
                Some(_) => None,
            },
            "select" => Some(Bucket::Selectboxes),
            "textarea" => Some(Bucket::Textareas),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Buttons => "button",
            Bucket::Hidden => "hidden",
            Bucket::Checkboxes => "checkbox",
            Bucket::Textboxes => "textbox",
            Bucket::Radioboxes => "radio",
            Bucket::Selectboxes => "select",
            Bucket::Textareas => "textarea",
        }
    }
}

/// How a caller-supplied field key is compared against a field, tried in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKey {
    Name,
    Label,
    BeforeText,
}

impl FieldKey {
    pub const ORDER: [FieldKey; 3] = [FieldKey::Name, FieldKey::Label, FieldKey::BeforeText];
}

#[derive(Debug, Clone)]
pub struct Form {
    pub name: String,
    pub action: Option<String>,
    pub method: Method,
    document: Document,
    buttons: Vec<NodeId>,
    hidden: Vec<NodeId>,
    checkboxes: Vec<NodeId>,
    textboxes: Vec<NodeId>,
    radioboxes: Vec<NodeId>,
    selectboxes: Vec<NodeId>,
    textareas: Vec<NodeId>,
}

impl Form {
    /// Build a form from one `<form>…</form>` span, parsed on its own.
    /// `name` is left empty when the markup has none.
    pub fn from_fragment(fragment: &str) -> Self {
        let document = Document::parse_fragment(fragment);
        let form_el = document
            .find_first(document.root(), &Matcher::tag("form"))
            .unwrap_or(document.root());

        let mut form = Self {
            name: document.attr(form_el, "name").unwrap_or_default().trim().to_string(),
            action: document
                .attr(form_el, "action")
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string),
            method: Method::from_attr(document.attr(form_el, "method")),
            document,
            buttons: Vec::new(),
            hidden: Vec::new(),
            checkboxes: Vec::new(),
            textboxes: Vec::new(),
            radioboxes: Vec::new(),
            selectboxes: Vec::new(),
            textareas: Vec::new(),
        };

        for id in form.document.find_descendants(form_el, &Matcher::any()) {
            let bucket = form.document.element(id).and_then(Bucket::classify);
            if let Some(bucket) = bucket {
                form.bucket_vec(bucket).push(id);
            }
        }
        form
    }

    fn bucket_vec(&mut self, bucket: Bucket) -> &mut Vec<NodeId> {
        match bucket {
            Bucket::Buttons => &mut self.buttons,
            Bucket::Hidden => &mut self.hidden,
            Bucket::Checkboxes => &mut self.checkboxes,
            Bucket::Textboxes => &mut self.textboxes,
            Bucket::Radioboxes => &mut self.radioboxes,
            Bucket::Selectboxes => &mut self.selectboxes,
            Bucket::Textareas => &mut self.textareas,
        }
    }

    pub fn bucket(&self, bucket: Bucket) -> &[NodeId] {
        match bucket {
            Bucket::Buttons => &self.buttons,
            Bucket::Hidden => &self.hidden,
            Bucket::Checkboxes => &self.checkboxes,
            Bucket::Textboxes => &self.textboxes,
            Bucket::Radioboxes => &self.radioboxes,
            Bucket::Selectboxes => &self.selectboxes,
            Bucket::Textareas => &self.textareas,
        }
    }

    /// Every classified field with its bucket, bucket by bucket.
    pub fn fields(&self) -> impl Iterator<Item = (Bucket, NodeId)> + '_ {
        Bucket::ALL
            .into_iter()
            .flat_map(move |b| self.bucket(b).iter().map(move |&id| (b, id)))
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn field_name(&self, id: NodeId) -> Option<&str> {
        self.document.attr(id, "name")
    }

    pub fn value(&self, id: NodeId) -> Option<&str> {
        self.document.attr(id, "value")
    }

    pub fn is_checked(&self, id: NodeId) -> bool {
        self.document
            .element(id)
            .is_some_and(|el| el.has_attr("checked"))
    }

    /// Human-readable label: `<label for=id>`, then an enclosing `<label>`,
    /// then the element's own associated text.
    pub fn label(&self, id: NodeId) -> Option<String> {
        let doc = &self.document;
        if let Some(field_id) = doc.attr(id, "id").filter(|v| !v.is_empty()) {
            if let Some(label) =
                doc.find_first(doc.root(), &Matcher::tag("label").with_attr("for", field_id))
            {
                return Some(clean(&doc.text_content(label)));
            }
        }
        if let Some(label) = doc.find_ancestor(id, &Matcher::tag("label")) {
            return Some(clean(&doc.text_content(label)));
        }
        doc.element(id)?
            .associated_text
            .as_ref()?
            .as_text()
            .map(str::to_string)
    }

    pub fn before_text(&self, id: NodeId) -> Option<&str> {
        self.document.element(id)?.before_text.as_deref()
    }

    fn key_matches(&self, id: NodeId, key: &str, how: FieldKey) -> bool {
        let candidate = match how {
            FieldKey::Name => self.field_name(id).map(str::to_string),
            FieldKey::Label => self.label(id),
            FieldKey::BeforeText => self.before_text(id).map(str::to_string),
        };
        candidate.is_some_and(|c| c.trim().eq_ignore_ascii_case(key.trim()))
    }

    /// First field in `buckets` whose `how` key equals `key`, case-insensitively.
    pub fn find_field_by(&self, buckets: &[Bucket], key: &str, how: FieldKey) -> Option<NodeId> {
        buckets
            .iter()
            .flat_map(|&b| self.bucket(b).iter().copied())
            .find(|&id| self.key_matches(id, key, how))
    }

    pub fn find_field(&self, buckets: &[Bucket], key: &str) -> Option<NodeId> {
        FieldKey::ORDER
            .iter()
            .find_map(|&how| self.find_field_by(buckets, key, how))
    }

    /// Button whose value, name or image source matches `selector`.
    pub fn find_button(&self, selector: &str) -> Option<NodeId> {
        let selector = selector.trim();
        self.buttons.iter().copied().find(|&id| {
            let Some(el) = self.document.element(id) else {
                return false;
            };
            let eq = |v: Option<&str>| v.is_some_and(|v| v.trim().eq_ignore_ascii_case(selector));
            let src_matches = el.attr("src").is_some_and(|src| {
                src.eq_ignore_ascii_case(selector)
                    || src
                        .rsplit('/')
                        .next()
                        .is_some_and(|last| last.eq_ignore_ascii_case(selector))
            });
            let text_matches =
                el.tag == "button" && clean(&self.document.text_content(id)).eq_ignore_ascii_case(selector);
            eq(el.attr("value")) || eq(el.attr("name")) || src_matches || text_matches
        })
    }

    /// Set a text field's value. Textareas take it as their content.
    pub fn set_value(&mut self, id: NodeId, value: &str) {
        let is_textarea = self.textareas.contains(&id);
        if is_textarea {
            self.document.replace_text(id, value);
        } else if let Some(el) = self.document.element_mut(id) {
            el.set_attr("value", value);
        }
    }

    pub fn set_checked(&mut self, id: NodeId, checked: bool) {
        if let Some(el) = self.document.element_mut(id) {
            if checked {
                el.set_attr("checked", "checked");
            } else {
                el.remove_attr("checked");
            }
        }
    }

    /// Radio buttons sharing `group` as their name.
    pub fn radio_group(&self, group: &str) -> Vec<NodeId> {
        self.radioboxes
            .iter()
            .copied()
            .filter(|&id| {
                self.field_name(id)
                    .is_some_and(|n| n.eq_ignore_ascii_case(group.trim()))
            })
            .collect()
    }

    /// Check the radio in `group` whose value is `value`, unchecking the rest.
    pub fn set_radio(&mut self, group: &str, value: &str) -> Result<()> {
        let members = self.radio_group(group);
        if members.is_empty() {
            return Err(BrowseError::not_found("radio group", group));
        }
        let target = members
            .iter()
            .copied()
            .find(|&id| self.value(id) == Some(value))
            .ok_or_else(|| BrowseError::not_found("radio value", format!("{group}={value}")))?;
        for id in members {
            self.set_checked(id, id == target);
        }
        Ok(())
    }

    pub fn options(&self, select: NodeId) -> &[NodeId] {
        self.document.options(select)
    }

    fn option_matches(&self, option: NodeId, wanted: &str) -> bool {
        let doc = &self.document;
        doc.attr(option, "value") == Some(wanted)
            || doc
                .attr(option, "label")
                .is_some_and(|l| l.trim().eq_ignore_ascii_case(wanted.trim()))
            || clean(&doc.text_content(option)).eq_ignore_ascii_case(wanted.trim())
    }

    /// Mark the option matching `wanted` (value, label or text) as selected.
    /// Other selections are cleared unless the select allows several.
    pub fn select_option(&mut self, select: NodeId, wanted: &str) -> Result<()> {
        let options = self.options(select).to_vec();
        let chosen = options
            .iter()
            .copied()
            .find(|&opt| self.option_matches(opt, wanted))
            .ok_or_else(|| {
                let select_name = self.field_name(select).unwrap_or_default();
                BrowseError::not_found("option", format!("{select_name}={wanted}"))
            })?;

        let multiple = self
            .document
            .element(select)
            .is_some_and(|el| el.has_attr("multiple"));
        for opt in options {
            if let Some(el) = self.document.element_mut(opt) {
                if opt == chosen {
                    el.set_attr("selected", "selected");
                } else if !multiple {
                    el.remove_attr("selected");
                }
            }
        }
        Ok(())
    }

    pub fn is_selected(&self, option: NodeId) -> bool {
        self.document
            .element(option)
            .is_some_and(|el| el.has_attr("selected"))
    }

    /// Submitted values of a select: each selected option's value, or its text.
    pub fn selected_values(&self, select: NodeId) -> Vec<String> {
        self.options(select)
            .iter()
            .copied()
            .filter(|&opt| self.is_selected(opt))
            .map(|opt| {
                self.document
                    .attr(opt, "value")
                    .map(str::to_string)
                    .unwrap_or_else(|| clean(&self.document.text_content(opt)))
            })
            .collect()
    }

    pub fn textarea_text(&self, id: NodeId) -> Option<&str> {
        self.document
            .element(id)?
            .associated_text
            .as_ref()?
            .as_text()
    }
}

/// The forms of one page, in document order, addressable by name.
#[derive(Debug, Clone, Default)]
pub struct Forms {
    forms: Vec<Form>,
}

impl Forms {
    pub fn get(&self, name: &str) -> Option<&Form> {
        self.forms.iter().find(|f| f.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.forms.iter().position(|f| f.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Form> {
        self.forms.iter()
    }

    pub fn get_index(&self, index: usize) -> Option<&Form> {
        self.forms.get(index)
    }

    pub fn get_index_mut(&mut self, index: usize) -> Option<&mut Form> {
        self.forms.get_mut(index)
    }

    pub fn names(&self) -> Vec<&str> {
        self.forms.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.forms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }

    /// Find a field across all forms: every form is tried by name first, then
    /// by label, then by preceding text.
    pub fn find_field(&self, buckets: &[Bucket], key: &str) -> Option<(usize, NodeId)> {
        FieldKey::ORDER.iter().find_map(|&how| {
            self.forms
                .iter()
                .enumerate()
                .find_map(|(i, f)| f.find_field_by(buckets, key, how).map(|id| (i, id)))
        })
    }

    fn insert(&mut self, form: Form) {
        match self.position(&form.name) {
            Some(i) => self.forms[i] = form,
            None => self.forms.push(form),
        }
    }
}

impl<'a> IntoIterator for &'a Forms {
    type Item = &'a Form;
    type IntoIter = std::slice::Iter<'a, Form>;

    fn into_iter(self) -> Self::IntoIter {
        self.forms.iter()
    }
}

/// Build every form of a page. Each `<form>` span is cut out and parsed alone.
pub fn build_forms(markup: &str) -> Forms {
    let parsed: Vec<Form> = form_spans(markup)
        .into_iter()
        .map(Form::from_fragment)
        .collect();

    let mut used: HashSet<String> = parsed
        .iter()
        .filter(|f| !f.name.is_empty())
        .map(|f| f.name.clone())
        .collect();
    let mut next = 0usize;
    let mut forms = Forms::default();

    for mut form in parsed {
        if form.name.is_empty() {
            while used.contains(&format!("form{next}")) {
                next += 1;
            }
            form.name = format!("form{next}");
            used.insert(form.name.clone());
        }
        forms.insert(form);
    }

    debug!(forms = forms.len(), names = ?forms.names(), "forms built");
    forms
}

/// Byte spans from each `<form` to the first following `</form>`, or to the
/// end of input when unterminated. Spans never overlap.
fn form_spans(markup: &str) -> Vec<&str> {
    let lower = markup.to_ascii_lowercase();
    let mut spans = Vec::new();
    let mut from = 0;

    while let Some(start) = find_open_tag(&lower, "<form", from) {
        let end = match lower[start..].find("</form") {
            Some(rel) => {
                let close = start + rel;
                lower[close..]
                    .find('>')
                    .map_or(lower.len(), |gt| close + gt + 1)
            }
            None => lower.len(),
        };
        spans.push(&markup[start..end]);
        from = end;
    }
    spans
}

fn find_open_tag(lower: &str, tag: &str, from: usize) -> Option<usize> {
    let mut at = from;
    while let Some(rel) = lower.get(at..)?.find(tag) {
        let start = at + rel;
        match lower.as_bytes().get(start + tag.len()) {
            None => return Some(start),
            Some(b) if b.is_ascii_whitespace() || *b == b'>' || *b == b'/' => return Some(start),
            _ => at = start + tag.len(),
        }
    }
    None
}
