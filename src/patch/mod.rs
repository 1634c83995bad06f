//! Source patch engine: finds the host's menu-bar routine by shape, splices a
//! call to the pipeline hook into it and rebinds the result in the live
//! namespace.

pub mod anchor;
pub mod syntax;

use std::fmt;

use tracing::{debug, info, warn};

pub use anchor::{find_site, AnchorMatch, AnchorPattern};
use syntax::{parse, Arg, BlockPath, CallStmt, SourceFile, Stmt};

use crate::error::IntegrationFailure;
use crate::host::{HostModuleSource, HostNamespace};

pub const DEFAULT_HOOK_NAME: &str = "pipeline_menu_hook";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchResult {
    Success,
    AlreadyPatched,
    AnchorNotFound,
    RecompilationFailed,
}

impl PatchResult {
    pub fn label(self) -> &'static str {
        match self {
            PatchResult::Success => "success",
            PatchResult::AlreadyPatched => "already_patched",
            PatchResult::AnchorNotFound => "anchor_not_found",
            PatchResult::RecompilationFailed => "recompilation_failed",
        }
    }

    /// True when the hook is live in the host after this outcome.
    pub fn is_installed(self) -> bool {
        matches!(self, PatchResult::Success | PatchResult::AlreadyPatched)
    }
}

impl fmt::Display for PatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The resolved location of the host's menu-bar routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMenuSite {
    pub module: String,
    pub function: String,
    pub receiver: String,
    pub block_path: BlockPath,
    pub insert_index: usize,
    pub anchor: Option<String>,
    pub fingerprint: String,
}

pub struct PatchEngine {
    hook_name: String,
    patched: bool,
    site: Option<HostMenuSite>,
}

impl Default for PatchEngine {
    fn default() -> Self {
        Self::new(DEFAULT_HOOK_NAME)
    }
}

impl PatchEngine {
    pub fn new(hook_name: impl Into<String>) -> Self {
        Self { hook_name: hook_name.into(), patched: false, site: None }
    }

    pub fn hook_name(&self) -> &str {
        &self.hook_name
    }

    pub fn is_patched(&self) -> bool {
        self.patched
    }

    /// Site of the last successful patch.
    pub fn site(&self) -> Option<&HostMenuSite> {
        self.site.as_ref()
    }

    pub fn install(
        &mut self,
        namespace: &mut HostNamespace,
        source: &HostModuleSource,
        pattern: &AnchorPattern,
    ) -> PatchResult {
        if self.patched {
            debug!(module = %source.module, "[patch] hook already installed in this process");
            return PatchResult::AlreadyPatched;
        }

        let mut file = match parse(&source.text) {
            Ok(file) => file,
            Err(err) => {
                warn!(
                    failure = %IntegrationFailure::AnchorNotFound,
                    module = %source.module,
                    host_version = namespace.version(),
                    "[patch] module source did not parse: {err}"
                );
                return PatchResult::AnchorNotFound;
            }
        };
        let Some(site) = find_site(&file, pattern) else {
            warn!(
                failure = %IntegrationFailure::AnchorNotFound,
                module = %source.module,
                host_version = namespace.version(),
                pattern = %pattern.describe(),
                "[patch] no menu-bar routine matched"
            );
            return PatchResult::AnchorNotFound;
        };

        if self.already_hooked(namespace, &file, &source.module, &site.function) {
            info!(module = %source.module, function = %site.function, "[patch] marker present; leaving routine as is");
            self.patched = true;
            return PatchResult::AlreadyPatched;
        }

        let Some(def) = file.function(&site.function) else {
            return PatchResult::AnchorNotFound;
        };
        let fingerprint = fingerprint(file.slice(def.span));
        let hook = CallStmt::synthetic(
            None,
            self.hook_name.clone(),
            vec![Arg::Ident(site.receiver.clone()), Arg::Str(fingerprint.clone())],
        );
        let Some(block) = file.block_mut(&site.block) else {
            return PatchResult::AnchorNotFound;
        };
        block.stmts.insert(site.insert_index.min(block.stmts.len()), Stmt::Call(hook));
        let patched_text = file.render();

        let confirmed = parse(&patched_text)
            .ok()
            .and_then(|reparsed| reparsed.function(&site.function).map(|def| def.contains_call(&self.hook_name)))
            .unwrap_or(false);
        if !confirmed {
            warn!(
                failure = %IntegrationFailure::RecompilationFailed,
                module = %source.module,
                function = %site.function,
                "[patch] patched source lost the hook call"
            );
            return PatchResult::RecompilationFailed;
        }

        let ast = match namespace.compile(&source.module, &patched_text) {
            Ok(ast) => ast,
            Err(err) => {
                warn!(
                    failure = %IntegrationFailure::RecompilationFailed,
                    module = %source.module,
                    function = %site.function,
                    host_version = namespace.version(),
                    "[patch] {err}"
                );
                return PatchResult::RecompilationFailed;
            }
        };
        let rebound = namespace.exec_compiled(&source.module, &patched_text, ast);
        info!(
            module = %source.module,
            function = %site.function,
            receiver = %site.receiver,
            fingerprint = %fingerprint,
            anchor = site.inserted_before.as_deref().unwrap_or("<end>"),
            rebound = rebound.len(),
            "[patch] hook installed"
        );
        self.site = Some(HostMenuSite {
            module: source.module.clone(),
            function: site.function,
            receiver: site.receiver,
            block_path: site.block,
            insert_index: site.insert_index,
            anchor: site.inserted_before,
            fingerprint,
        });
        self.patched = true;
        PatchResult::Success
    }

    fn already_hooked(&self, namespace: &HostNamespace, file: &SourceFile, module: &str, function: &str) -> bool {
        if file.function(function).is_some_and(|def| def.contains_call(&self.hook_name)) {
            return true;
        }
        let Some(live) = namespace.routine(module, function) else {
            return false;
        };
        parse(live.source())
            .ok()
            .and_then(|live_file| live_file.function(function).map(|def| def.contains_call(&self.hook_name)))
            .unwrap_or(false)
    }
}

/// First 16 hex chars of the BLAKE3 hash of `text`.
pub fn fingerprint(text: &str) -> String {
    let hash = blake3::hash(text.as_bytes());
    hash.to_hex().as_str()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MenuLayout;
    use std::rc::Rc;

    const TOPBAR: &str = r#"
fn draw(layout) {
    layout.menu("TOPBAR_MT_file");
    layout.menu("TOPBAR_MT_edit");
    layout.menu("TOPBAR_MT_help")
}
"#;

    fn namespace() -> HostNamespace {
        let mut ns = HostNamespace::new("4.1");
        ns.register_function(DEFAULT_HOOK_NAME, Rc::new(|layout: &MenuLayout| layout.push_menu("PIPELINE")));
        ns.exec("space_topbar", TOPBAR).expect("exec");
        ns
    }

    #[test]
    fn appends_hook_after_unterminated_statement() {
        let mut ns = namespace();
        let source = ns.module_source("space_topbar").expect("source");
        let mut engine = PatchEngine::default();
        assert_eq!(engine.install(&mut ns, &source, &AnchorPattern::default()), PatchResult::Success);
        let live = ns.module_source("space_topbar").expect("live");
        assert!(live.text.contains("layout.menu(\"TOPBAR_MT_help\");\n    pipeline_menu_hook(layout, \""));
        let site = engine.site().expect("site");
        assert_eq!(site.function, "draw");
        assert_eq!(site.fingerprint.len(), 16);
    }

    #[test]
    fn second_install_is_a_no_op() {
        let mut ns = namespace();
        let source = ns.module_source("space_topbar").expect("source");
        let mut engine = PatchEngine::default();
        engine.install(&mut ns, &source, &AnchorPattern::default());
        let patched = ns.module_source("space_topbar").expect("live");

        let mut fresh = PatchEngine::default();
        assert_eq!(fresh.install(&mut ns, &patched, &AnchorPattern::default()), PatchResult::AlreadyPatched);
        assert_eq!(fresh.install(&mut ns, &source, &AnchorPattern::default()), PatchResult::AlreadyPatched);
        assert_eq!(ns.module_source("space_topbar").expect("live"), patched);
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(fingerprint("fn a() {}"), fingerprint("fn a() {}"));
        assert_ne!(fingerprint("fn a() {}"), fingerprint("fn b() {}"));
    }
}
