use std::cell::RefCell;
use std::rc::Rc;

use rhai::Engine;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayoutItem {
    Menu {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        icon: Option<String>,
    },
    Separator,
    Label { text: String },
}

/// The in-progress menu bar handed to draw routines. Clones share one item
/// list, so a script receiving the layout by value still records into it.
#[derive(Debug, Clone, Default)]
pub struct MenuLayout {
    items: Rc<RefCell<Vec<LayoutItem>>>,
    compact: bool,
}

impl MenuLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compact() -> Self {
        Self { items: Rc::default(), compact: true }
    }

    pub fn push_menu(&self, id: &str) {
        self.items.borrow_mut().push(LayoutItem::Menu { id: id.to_string(), text: None, icon: None });
    }

    pub fn push_menu_with(&self, id: &str, text: Option<&str>, icon: Option<&str>) {
        self.items.borrow_mut().push(LayoutItem::Menu {
            id: id.to_string(),
            text: text.map(str::to_string),
            icon: icon.map(str::to_string),
        });
    }

    pub fn push_label(&self, text: &str) {
        self.items.borrow_mut().push(LayoutItem::Label { text: text.to_string() });
    }

    pub fn items(&self) -> Vec<LayoutItem> {
        self.items.borrow().clone()
    }

    pub fn menu_ids(&self) -> Vec<String> {
        self.items
            .borrow()
            .iter()
            .filter_map(|item| match item {
                LayoutItem::Menu { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    fn menu(&mut self, id: &str) {
        self.push_menu(id);
    }

    fn menu_with(&mut self, id: &str, text: &str, icon: &str) {
        let text = (!text.is_empty()).then_some(text);
        let icon = (!icon.is_empty()).then_some(icon);
        self.push_menu_with(id, text, icon);
    }

    fn separator(&mut self) {
        self.items.borrow_mut().push(LayoutItem::Separator);
    }

    fn label(&mut self, text: &str) {
        self.push_label(text);
    }

    fn is_compact(&mut self) -> bool {
        self.compact
    }
}

pub(crate) fn register_layout_api(engine: &mut Engine) {
    engine.register_type_with_name::<MenuLayout>("MenuLayout");
    engine.register_fn("menu", MenuLayout::menu);
    engine.register_fn("menu", MenuLayout::menu_with);
    engine.register_fn("separator", MenuLayout::separator);
    engine.register_fn("label", MenuLayout::label);
    engine.register_get("compact", MenuLayout::is_compact);
}
