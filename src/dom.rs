use std::cell::OnceCell;

use scraper::{ElementRef, Html};
use tracing::debug;

use crate::text::{clean, is_formatting_tag};

/// Index of a node inside its owning [`Document`].
pub type NodeId = usize;

/// Where an element's human-readable text comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum AssociatedText {
    Text(String),
    /// An `href`-bearing element met while scanning; it stands in for the text.
    Link(NodeId),
}

impl AssociatedText {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::Link(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub associated_text: Option<AssociatedText>,
    pub before_text: Option<String>,
    /// `<option>` descendants of a select, filled on first access and never
    /// refreshed afterwards.
    options: OnceCell<Vec<NodeId>>,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
            associated_text: None,
            before_text: None,
            options: OnceCell::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        match self
            .attrs
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some((_, v)) => *v = value.to_string(),
            None => self
                .attrs
                .push((name.to_ascii_lowercase(), value.to_string())),
        }
    }

    pub fn remove_attr(&mut self, name: &str) {
        self.attrs.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Conditions an element must meet; every supplied condition must hold.
#[derive(Default)]
pub struct Matcher<'a> {
    tag: Option<String>,
    attrs: Vec<(String, String)>,
    test: Option<Box<dyn Fn(&Element) -> bool + 'a>>,
}

impl<'a> Matcher<'a> {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn tag(tag: &str) -> Self {
        Self {
            tag: Some(tag.to_ascii_lowercase()),
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_test(mut self, test: impl Fn(&Element) -> bool + 'a) -> Self {
        self.test = Some(Box::new(test));
        self
    }

    pub fn matches(&self, el: &Element) -> bool {
        if let Some(tag) = &self.tag {
            if el.tag != *tag {
                return false;
            }
        }
        if !self
            .attrs
            .iter()
            .all(|(name, value)| el.attr(name) == Some(value.as_str()))
        {
            return false;
        }
        self.test.as_ref().map_or(true, |test| test(el))
    }
}

/// Arena-backed element tree. Node 0 is the root element.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    /// Parse a complete page. Missing end tags are closed at end of input.
    pub fn parse(markup: &str) -> Self {
        let html = Html::parse_document(markup);
        Self::from_html(&html)
    }

    /// Parse an isolated markup fragment (such as a single `<form>` span).
    pub fn parse_fragment(markup: &str) -> Self {
        let html = Html::parse_fragment(markup);
        Self::from_html(&html)
    }

    fn from_html(html: &Html) -> Self {
        let mut doc = Self { nodes: Vec::new() };
        doc.import(html.root_element(), None);
        doc.annotate(doc.root());
        debug!(nodes = doc.nodes.len(), "document built");
        doc
    }

    fn push(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            kind,
            parent,
            children: Vec::new(),
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(id);
        }
        id
    }

    fn import(&mut self, el: ElementRef, parent: Option<NodeId>) -> NodeId {
        let mut element = Element::new(el.value().name());
        element.attrs = el
            .value()
            .attrs()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
            .collect();
        let id = self.push(NodeKind::Element(element), parent);

        for child in el.children() {
            if let Some(child_el) = ElementRef::wrap(child) {
                self.import(child_el, Some(id));
            } else if let Some(text) = child.value().as_text() {
                let content: &str = &text.text;
                self.push(NodeKind::Text(content.to_string()), Some(id));
            }
        }
        id
    }

    /// Fill `associated_text` and `before_text` for `id` and everything below it.
    fn annotate(&mut self, id: NodeId) {
        let associated = self.scan_text(id);
        let before = self.preceding_text(id);
        if let NodeKind::Element(el) = &mut self.nodes[id].kind {
            el.associated_text = associated;
            el.before_text = before;
        }
        let children = self.nodes[id].children.clone();
        for child in children {
            if self.element(child).is_some() {
                self.annotate(child);
            }
        }
    }

    fn scan_text(&self, id: NodeId) -> Option<AssociatedText> {
        for &child in &self.nodes[id].children {
            match &self.nodes[child].kind {
                NodeKind::Text(t) => {
                    let cleaned = clean(t);
                    if !cleaned.is_empty() {
                        return Some(AssociatedText::Text(cleaned));
                    }
                }
                NodeKind::Element(el) => {
                    if el.has_attr("href") {
                        return Some(AssociatedText::Link(child));
                    }
                    if is_formatting_tag(&el.tag) {
                        if let Some(found) = self.scan_text(child) {
                            return Some(found);
                        }
                    }
                }
            }
        }
        None
    }

    fn preceding_text(&self, id: NodeId) -> Option<String> {
        let parent = self.nodes[id].parent?;
        let siblings = &self.nodes[parent].children;
        let pos = siblings.iter().position(|&s| s == id)?;

        for &sib in siblings[..pos].iter().rev() {
            match &self.nodes[sib].kind {
                NodeKind::Text(t) => {
                    let cleaned = clean(t);
                    if !cleaned.is_empty() {
                        return Some(cleaned);
                    }
                }
                NodeKind::Element(_) => {
                    // Siblings precede in document order, so their own scan is
                    // independent of this element's annotation.
                    return match self.scan_text(sib) {
                        Some(AssociatedText::Text(t)) => Some(t),
                        _ => None,
                    };
                }
            }
        }
        None
    }

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes.get(id)?.kind {
            NodeKind::Element(el) => Some(el),
            NodeKind::Text(_) => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes.get_mut(id)?.kind {
            NodeKind::Element(el) => Some(el),
            NodeKind::Text(_) => None,
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?.attr(name)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    /// Elements below `from` (not `from` itself), depth-first pre-order.
    pub fn find_descendants(&self, from: NodeId, matcher: &Matcher) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[from].children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if let NodeKind::Element(el) = &self.nodes[id].kind {
                if matcher.matches(el) {
                    found.push(id);
                }
                stack.extend(self.nodes[id].children.iter().rev().copied());
            }
        }
        found
    }

    pub fn find_first(&self, from: NodeId, matcher: &Matcher) -> Option<NodeId> {
        self.find_descendants(from, matcher).into_iter().next()
    }

    /// Nearest enclosing element of `from` that matches, walking up to the root.
    pub fn find_ancestor(&self, from: NodeId, matcher: &Matcher) -> Option<NodeId> {
        let mut current = self.parent(from);
        while let Some(id) = current {
            if let Some(el) = self.element(id) {
                if matcher.matches(el) {
                    return Some(id);
                }
            }
            current = self.parent(id);
        }
        None
    }

    /// Concatenated text of every text run below `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id].kind {
            NodeKind::Text(t) => out.push_str(t),
            NodeKind::Element(_) => {
                for &child in &self.nodes[id].children {
                    self.collect_text(child, out);
                }
            }
        }
    }

    /// The `<option>` elements of a select, as seen on first call.
    pub fn options(&self, select: NodeId) -> &[NodeId] {
        let NodeKind::Element(el) = &self.nodes[select].kind else {
            return &[];
        };
        el.options
            .get_or_init(|| self.find_descendants(select, &Matcher::tag("option")))
    }

    /// First `<title>` text, cleaned.
    pub fn title(&self) -> String {
        self.find_first(self.root(), &Matcher::tag("title"))
            .map(|id| clean(&self.text_content(id)))
            .unwrap_or_default()
    }

    /// Detach every child of `id` and replace them with a single text run.
    pub fn replace_text(&mut self, id: NodeId, text: &str) {
        let text_id = self.nodes.len();
        self.nodes.push(Node {
            kind: NodeKind::Text(text.to_string()),
            parent: Some(id),
            children: Vec::new(),
        });
        let old = std::mem::replace(&mut self.nodes[id].children, vec![text_id]);
        for child in old {
            self.nodes[child].parent = None;
        }
        let cleaned = clean(text);
        if let NodeKind::Element(el) = &mut self.nodes[id].kind {
            el.associated_text = if cleaned.is_empty() {
                None
            } else {
                Some(AssociatedText::Text(cleaned))
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first(doc: &Document, tag: &str) -> NodeId {
        doc.find_first(doc.root(), &Matcher::tag(tag))
            .unwrap_or_else(|| panic!("no <{tag}>"))
    }

    #[test]
    fn root_is_html_element() {
        let doc = Document::parse("<p>hi</p>");
        assert_eq!(doc.element(doc.root()).unwrap().tag, "html");
    }

    #[test]
    fn tags_and_attribute_names_lowercased() {
        let doc = Document::parse(r#"<DIV CLASS="Box">x</DIV>"#);
        let div = first(&doc, "div");
        assert_eq!(doc.attr(div, "class"), Some("Box"));
        assert_eq!(doc.attr(div, "CLASS"), Some("Box"));
    }

    #[test]
    fn unterminated_markup_is_closed() {
        let doc = Document::parse("<table><tr><td>one<td>two");
        let cells = doc.find_descendants(doc.root(), &Matcher::tag("td"));
        assert_eq!(cells.len(), 2);
        assert_eq!(doc.text_content(cells[1]), "two");
    }

    #[test]
    fn descendants_in_preorder() {
        let doc = Document::parse(
            r#"<div id="a"><span id="b"><i id="c"></i></span><span id="d"></span></div>"#,
        );
        let ids: Vec<&str> = doc
            .find_descendants(doc.root(), &Matcher::any().with_test(|el| el.has_attr("id")))
            .into_iter()
            .map(|n| doc.attr(n, "id").unwrap())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn descendants_exclude_start() {
        let doc = Document::parse("<div><div></div></div>");
        let outer = first(&doc, "div");
        assert_eq!(doc.find_descendants(outer, &Matcher::tag("div")).len(), 1);
    }

    #[test]
    fn matcher_ands_conditions() {
        let doc = Document::parse(
            r#"<a href="/x" class="nav">1</a><a href="/y" class="nav">2</a><a href="/x">3</a>"#,
        );
        let found = doc.find_descendants(
            doc.root(),
            &Matcher::tag("a")
                .with_attr("href", "/x")
                .with_test(|el| el.attr("class") == Some("nav")),
        );
        assert_eq!(found.len(), 1);
        assert_eq!(doc.text_content(found[0]), "1");
    }

    #[test]
    fn ancestor_search_walks_outward() {
        let doc = Document::parse(
            r#"<table class="outer"><tr><td><table class="inner"><tr><td><input name="q"></td></tr></table></td></tr></table>"#,
        );
        let input = first(&doc, "input");
        let table = doc.find_ancestor(input, &Matcher::tag("table")).unwrap();
        assert_eq!(doc.attr(table, "class"), Some("inner"));
        let outer = doc
            .find_ancestor(input, &Matcher::tag("table").with_attr("class", "outer"))
            .unwrap();
        assert_eq!(doc.attr(outer, "class"), Some("outer"));
        assert!(doc.find_ancestor(input, &Matcher::tag("form")).is_none());
    }

    #[test]
    fn associated_text_first_non_empty_run() {
        let doc = Document::parse("<table><tr><td>  \n  Released\u{a0} </td></tr></table>");
        let td = first(&doc, "td");
        assert_eq!(
            doc.element(td).unwrap().associated_text,
            Some(AssociatedText::Text("Released".into()))
        );
    }

    #[test]
    fn associated_text_recurses_into_formatting_tags() {
        let doc = Document::parse("<p><b><i>Genre</i></b> rock</p>");
        let p = first(&doc, "p");
        assert_eq!(
            doc.element(p).unwrap().associated_text,
            Some(AssociatedText::Text("Genre".into()))
        );
    }

    #[test]
    fn associated_text_stops_at_links() {
        let doc = Document::parse(r#"<p><a href="/artist/1">Nick Drake</a> later</p>"#);
        let p = first(&doc, "p");
        let a = first(&doc, "a");
        assert_eq!(
            doc.element(p).unwrap().associated_text,
            Some(AssociatedText::Link(a))
        );
    }

    #[test]
    fn associated_text_skips_other_elements() {
        let doc = Document::parse("<p><span>inner</span>outer</p>");
        let p = first(&doc, "p");
        assert_eq!(
            doc.element(p).unwrap().associated_text,
            Some(AssociatedText::Text("outer".into()))
        );
    }

    #[test]
    fn before_text_from_preceding_run() {
        let doc = Document::parse(r#"<p>Artist name: <input name="q"></p>"#);
        let input = first(&doc, "input");
        assert_eq!(
            doc.element(input).unwrap().before_text.as_deref(),
            Some("Artist name:")
        );
    }

    #[test]
    fn before_text_from_preceding_element() {
        let doc = Document::parse(r#"<div><span>Year</span> <input name="y"></div>"#);
        let input = first(&doc, "input");
        assert_eq!(
            doc.element(input).unwrap().before_text.as_deref(),
            Some("Year")
        );
    }

    #[test]
    fn options_snapshot_on_first_access() {
        let mut doc = Document::parse(
            r#"<select name="s"><option value="1">One</option><option value="2">Two</option></select>"#,
        );
        let select = first(&doc, "select");
        assert_eq!(doc.options(select).len(), 2);

        let second = doc.options(select)[1];
        doc.replace_text(select, "gone");
        assert_eq!(doc.options(select).len(), 2);
        assert_eq!(doc.options(select)[1], second);
    }

    #[test]
    fn title_is_cleaned() {
        let doc = Document::parse("<html><head><title>\n Album Search \n</title></head></html>");
        assert_eq!(doc.title(), "Album Search");
    }

    #[test]
    fn replace_text_updates_associated_text() {
        let mut doc = Document::parse("<textarea name=notes>old</textarea>");
        let ta = first(&doc, "textarea");
        doc.replace_text(ta, "new notes");
        assert_eq!(doc.text_content(ta), "new notes");
        assert_eq!(
            doc.element(ta).unwrap().associated_text,
            Some(AssociatedText::Text("new notes".into()))
        );
    }
}
