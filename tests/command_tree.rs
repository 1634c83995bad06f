use anyhow::{bail, Result};
use menu_bridge::commands::{
    build, BuildOptions, CommandKind, CommandProvider, CommandSpec, CommandTree, FavoriteRef, MenuNode,
    ProviderRegistry,
};
use menu_bridge::context::Context;
use std::rc::Rc;

struct Listed {
    name: &'static str,
    entries: Vec<(&'static str, bool)>,
}

impl CommandProvider for Listed {
    fn name(&self) -> &str {
        self.name
    }

    fn commands(&self, _context: &Context) -> Result<Vec<CommandSpec>> {
        Ok(self
            .entries
            .iter()
            .map(|(label, favorite)| {
                let spec = CommandSpec::new(format!("{}.{label}", self.name), *label, || Ok(()));
                if *favorite {
                    spec.favorite()
                } else {
                    spec
                }
            })
            .collect())
    }
}

struct Failing;

impl CommandProvider for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    fn commands(&self, context: &Context) -> Result<Vec<CommandSpec>> {
        bail!("no schema for project {:?}", context.project)
    }
}

struct Panicking;

impl CommandProvider for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    fn commands(&self, _context: &Context) -> Result<Vec<CommandSpec>> {
        panic!("provider exploded");
    }
}

/// Labels depend on the entity the user is working on.
struct EntityTools;

impl CommandProvider for EntityTools {
    fn name(&self) -> &str {
        "entity_tools"
    }

    fn commands(&self, context: &Context) -> Result<Vec<CommandSpec>> {
        let entity = context.entity_type.clone().unwrap_or_else(|| "Project".to_string());
        Ok(vec![
            CommandSpec::new("entity_tools.publish", "Publish...", || Ok(())),
            CommandSpec::new("entity_tools.browse", format!("{entity} Browser"), || Ok(())),
            CommandSpec::new("entity_tools.reload", "Reload Context", || Ok(())).kind(CommandKind::ContextMenu),
        ])
    }
}

fn registry(providers: Vec<Rc<dyn CommandProvider>>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(provider).expect("register provider");
    }
    registry
}

fn outline(tree: &CommandTree) -> Vec<String> {
    tree.outline()
}

#[test]
fn favorites_first_then_declaration_order() {
    let providers = registry(vec![
        Rc::new(Listed { name: "first", entries: vec![("Alpha", false), ("Starred One", true)] }),
        Rc::new(Listed { name: "second", entries: vec![("Beta", false), ("Starred Two", true), ("Gamma", false)] }),
    ]);
    let tree = build(&Context::default(), &providers, &BuildOptions::default());
    assert_eq!(outline(&tree), vec!["Starred One", "Starred Two", "---", "Alpha", "Beta", "Gamma"]);
}

#[test]
fn separator_only_between_two_non_empty_sections() {
    let only_plain = registry(vec![Rc::new(Listed { name: "a", entries: vec![("One", false), ("Two", false)] })]);
    let tree = build(&Context::default(), &only_plain, &BuildOptions::default());
    assert!(!tree.nodes.iter().any(|node| matches!(node, MenuNode::Separator)));

    let only_favorites = registry(vec![Rc::new(Listed { name: "a", entries: vec![("One", true)] })]);
    let tree = build(&Context::default(), &only_favorites, &BuildOptions::default());
    assert_eq!(outline(&tree), vec!["One"]);

    let empty = ProviderRegistry::new();
    let tree = build(&Context::default(), &empty, &BuildOptions::default());
    assert!(tree.is_empty());
}

#[test]
fn failing_and_panicking_providers_are_isolated() {
    let providers = registry(vec![
        Rc::new(Listed { name: "before", entries: vec![("Kept Before", false)] }),
        Rc::new(Failing),
        Rc::new(Panicking),
        Rc::new(Listed { name: "after", entries: vec![("Kept After", false)] }),
    ]);
    let tree = build(&Context::new("projectA"), &providers, &BuildOptions::default());
    assert_eq!(outline(&tree), vec!["Kept Before", "Kept After"]);
    assert_eq!(tree.failures.len(), 2);
    assert_eq!(tree.failures[0].provider, "failing");
    assert!(!tree.failures[0].panicked);
    assert!(tree.failures[0].message.contains("projectA"));
    assert_eq!(tree.failures[1].provider, "panicking");
    assert!(tree.failures[1].panicked);
    assert_eq!(tree.failures[1].message, "provider exploded");
}

#[test]
fn context_items_stay_out_of_the_main_list() {
    let providers = registry(vec![Rc::new(EntityTools)]);
    let context = Context::new("projectA").with_entity("Shot", "shot010").with_task("comp");
    let tree = build(&context, &providers, &BuildOptions::default());
    assert_eq!(outline(&tree), vec!["Publish...", "Shot Browser"]);
    assert_eq!(tree.context_items.len(), 1);
    assert_eq!(tree.context_items[0].label, "Reload Context");
    assert_eq!(tree.context_label, "projectA / Shot shot010 / comp");
}

#[test]
fn rebuilding_is_deterministic() {
    let providers = registry(vec![
        Rc::new(Listed { name: "a", entries: vec![("One", false), ("Two", true)] }),
        Rc::new(EntityTools),
    ]);
    let options = BuildOptions { favorites: vec![FavoriteRef { provider: "entity_tools".into(), label: "Publish...".into() }] };
    let context = Context::new("projectA").with_entity("Asset", "assetY");
    let first = build(&context, &providers, &options);
    let second = build(&context, &providers, &options);
    assert_eq!(outline(&first), outline(&second));
    assert_eq!(outline(&first), vec!["Two", "Publish...", "---", "One", "Asset Browser"]);
}
