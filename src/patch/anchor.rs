use serde::{Deserialize, Serialize};

use super::syntax::{BlockPath, SourceFile, Stmt};

/// Structural signature of the host's menu-bar routine: a statement list with
/// several sibling `receiver.primitive("ID", ...)` calls on one receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorPattern {
    #[serde(default = "AnchorPattern::default_primitive")]
    pub primitive: String,
    #[serde(default = "AnchorPattern::default_min_sibling_calls")]
    pub min_sibling_calls: usize,
    /// Every matched call's first argument must start with this prefix.
    #[serde(default)]
    pub id_prefix: Option<String>,
    /// Ids that must all appear among the matched calls.
    #[serde(default)]
    pub required_ids: Vec<String>,
    /// Insert the hook before the call for this id instead of at the end of
    /// the statement list. Ignored when the id is not present.
    #[serde(default)]
    pub insert_before: Option<String>,
}

impl AnchorPattern {
    fn default_primitive() -> String {
        "menu".to_string()
    }

    const fn default_min_sibling_calls() -> usize {
        3
    }

    pub fn describe(&self) -> String {
        let mut out = format!("{}+ sibling `<recv>.{}(\"…\")` calls", self.min_sibling_calls, self.primitive);
        if let Some(prefix) = &self.id_prefix {
            out.push_str(&format!(", ids prefixed '{prefix}'"));
        }
        if !self.required_ids.is_empty() {
            out.push_str(&format!(", requiring {:?}", self.required_ids));
        }
        out
    }

    fn accepts_id(&self, id: &str) -> bool {
        self.id_prefix.as_deref().map_or(true, |prefix| id.starts_with(prefix))
    }
}

impl Default for AnchorPattern {
    fn default() -> Self {
        Self {
            primitive: Self::default_primitive(),
            min_sibling_calls: Self::default_min_sibling_calls(),
            id_prefix: None,
            required_ids: Vec::new(),
            insert_before: None,
        }
    }
}

/// Where in a parsed module the hook call goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorMatch {
    pub function: String,
    pub item: usize,
    pub block: BlockPath,
    pub receiver: String,
    pub menu_ids: Vec<String>,
    /// Statement index the hook is inserted at.
    pub insert_index: usize,
    /// Set when the insertion happens before a configured anchor id.
    pub inserted_before: Option<String>,
}

/// Finds the statement list that best matches `pattern`: the one with the
/// most qualifying sibling calls, first in source order on ties.
pub fn find_site(file: &SourceFile, pattern: &AnchorPattern) -> Option<AnchorMatch> {
    let mut best: Option<AnchorMatch> = None;
    for (item, def) in file.functions() {
        for (path, block) in file.blocks_of(item) {
            let mut by_receiver: Vec<(String, Vec<(usize, String)>)> = Vec::new();
            for (idx, stmt) in block.stmts.iter().enumerate() {
                let Stmt::Call(call) = stmt else { continue };
                let (Some(receiver), Some(id)) = (call.receiver.as_ref(), call.first_str_arg()) else {
                    continue;
                };
                if call.callee != pattern.primitive || !pattern.accepts_id(id) {
                    continue;
                }
                match by_receiver.iter_mut().find(|(name, _)| name == receiver) {
                    Some((_, calls)) => calls.push((idx, id.to_string())),
                    None => by_receiver.push((receiver.clone(), vec![(idx, id.to_string())])),
                }
            }
            for (receiver, calls) in by_receiver {
                if calls.len() < pattern.min_sibling_calls.max(1) {
                    continue;
                }
                let has_required =
                    pattern.required_ids.iter().all(|required| calls.iter().any(|(_, id)| id == required));
                if !has_required {
                    continue;
                }
                if best.as_ref().is_some_and(|current| current.menu_ids.len() >= calls.len()) {
                    continue;
                }
                let before = pattern
                    .insert_before
                    .as_ref()
                    .and_then(|anchor| calls.iter().find(|(_, id)| id == anchor).map(|(idx, id)| (*idx, id.clone())));
                let (insert_index, inserted_before) = match before {
                    Some((idx, id)) => (idx, Some(id)),
                    None => (block.stmts.len(), None),
                };
                best = Some(AnchorMatch {
                    function: def.name.clone(),
                    item,
                    block: path.clone(),
                    receiver,
                    menu_ids: calls.into_iter().map(|(_, id)| id).collect(),
                    insert_index,
                    inserted_before,
                });
            }
        }
    }
    best
}
