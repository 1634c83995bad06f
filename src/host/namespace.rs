use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use rhai::{Dynamic, Engine, ImmutableString, Scope, AST};
use tracing::{debug, warn};

use super::layout::{register_layout_api, LayoutItem, MenuLayout};
use crate::error::HostError;

/// Literal source of one host module, as handed to the patcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostModuleSource {
    pub module: String,
    pub text: String,
}

impl HostModuleSource {
    pub fn new(module: impl Into<String>, text: impl Into<String>) -> Self {
        Self { module: module.into(), text: text.into() }
    }
}

/// A compiled script function bound in the namespace. Menu classes hold
/// these by `Rc`, so rebinding a module must also repoint every class.
pub struct DrawRoutine {
    module: String,
    name: String,
    source: Rc<str>,
    ast: Rc<AST>,
}

impl DrawRoutine {
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn qualified_name(&self) -> String {
        qualified(&self.module, &self.name)
    }

    /// Source text of the module the routine was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for DrawRoutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrawRoutine").field("module", &self.module).field("name", &self.name).finish()
    }
}

pub type NativeDraw = Rc<dyn Fn(&MenuLayout) -> anyhow::Result<()>>;
pub type MenuOpenHandler = Rc<dyn Fn(Option<[f32; 2]>)>;

enum ClassDraw {
    Script(Rc<DrawRoutine>),
    Native(NativeDraw),
}

struct MenuClass {
    label: String,
    draw: ClassDraw,
    on_open: Option<MenuOpenHandler>,
}

/// The host's live namespace: compiled modules, bound routines, registered
/// menu classes and the generic append-extension point.
pub struct HostNamespace {
    engine: Engine,
    version: String,
    modules: BTreeMap<String, Rc<str>>,
    routines: BTreeMap<String, Rc<DrawRoutine>>,
    classes: BTreeMap<String, MenuClass>,
    extensions: BTreeMap<String, Vec<NativeDraw>>,
    extensions_enabled: bool,
}

fn qualified(module: &str, name: &str) -> String {
    format!("{module}::{name}")
}

impl HostNamespace {
    pub fn new(version: impl Into<String>) -> Self {
        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        register_layout_api(&mut engine);
        Self {
            engine,
            version: version.into(),
            modules: BTreeMap::new(),
            routines: BTreeMap::new(),
            classes: BTreeMap::new(),
            extensions: BTreeMap::new(),
            extensions_enabled: true,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Hosts without a generic menu extension point refuse `append_extension`.
    pub fn set_extensions_enabled(&mut self, enabled: bool) {
        self.extensions_enabled = enabled;
    }

    pub fn supports_extensions(&self) -> bool {
        self.extensions_enabled
    }

    /// Compiles `source` without touching the namespace.
    pub fn compile(&self, module: &str, source: &str) -> Result<AST, HostError> {
        self.engine
            .compile(source)
            .map_err(|err| HostError::Compile { module: module.to_string(), message: err.to_string() })
    }

    /// Compiles and executes a module: every function it defines is (re)bound,
    /// and any menu class drawing with a previous binding is repointed.
    pub fn exec(&mut self, module: &str, source: &str) -> Result<Vec<String>, HostError> {
        let ast = self.compile(module, source)?;
        Ok(self.exec_compiled(module, source, ast))
    }

    pub(crate) fn exec_compiled(&mut self, module: &str, source: &str, ast: AST) -> Vec<String> {
        let names: Vec<String> = ast.iter_functions().map(|meta| meta.name.to_string()).collect();
        let prefix = format!("{module}::");
        let stale: Vec<String> = self
            .routines
            .keys()
            .filter(|key| key.starts_with(&prefix) && !names.iter().any(|name| **key == qualified(module, name)))
            .cloned()
            .collect();
        for key in stale {
            self.routines.remove(&key);
            debug!(routine = %key, "[host] routine no longer defined; unbound");
        }
        let text: Rc<str> = Rc::from(source);
        let ast = Rc::new(ast);
        for name in &names {
            let routine = Rc::new(DrawRoutine {
                module: module.to_string(),
                name: name.clone(),
                source: text.clone(),
                ast: ast.clone(),
            });
            let key = qualified(module, name);
            if let Some(previous) = self.routines.insert(key.clone(), routine.clone()) {
                let mut repointed = 0usize;
                for class in self.classes.values_mut() {
                    if let ClassDraw::Script(current) = &class.draw {
                        if Rc::ptr_eq(current, &previous) {
                            class.draw = ClassDraw::Script(routine.clone());
                            repointed += 1;
                        }
                    }
                }
                debug!(routine = %key, repointed, "[host] routine rebound");
            }
        }
        self.modules.insert(module.to_string(), text);
        names
    }

    pub fn module_source(&self, module: &str) -> Option<HostModuleSource> {
        self.modules.get(module).map(|text| HostModuleSource::new(module, text.as_ref()))
    }

    pub fn routine(&self, module: &str, name: &str) -> Option<Rc<DrawRoutine>> {
        self.routines.get(&qualified(module, name)).cloned()
    }

    pub fn register_script_class(
        &mut self,
        id: &str,
        label: &str,
        module: &str,
        function: &str,
    ) -> Result<(), HostError> {
        if self.classes.contains_key(id) {
            return Err(HostError::ClassExists(id.to_string()));
        }
        let routine = self
            .routine(module, function)
            .ok_or_else(|| HostError::RoutineNotFound(qualified(module, function)))?;
        self.classes.insert(
            id.to_string(),
            MenuClass { label: label.to_string(), draw: ClassDraw::Script(routine), on_open: None },
        );
        Ok(())
    }

    pub fn register_native_class(
        &mut self,
        id: &str,
        label: &str,
        draw: NativeDraw,
        on_open: Option<MenuOpenHandler>,
    ) -> Result<(), HostError> {
        if self.classes.contains_key(id) {
            return Err(HostError::ClassExists(id.to_string()));
        }
        self.classes.insert(id.to_string(), MenuClass { label: label.to_string(), draw: ClassDraw::Native(draw), on_open });
        Ok(())
    }

    pub fn unregister_class(&mut self, id: &str) -> bool {
        self.extensions.remove(id);
        self.classes.remove(id).is_some()
    }

    pub fn has_class(&self, id: &str) -> bool {
        self.classes.contains_key(id)
    }

    pub fn class_label(&self, id: &str) -> Option<&str> {
        self.classes.get(id).map(|class| class.label.as_str())
    }

    /// The routine a script class currently draws with.
    pub fn class_routine(&self, id: &str) -> Option<Rc<DrawRoutine>> {
        match self.classes.get(id).map(|class| &class.draw) {
            Some(ClassDraw::Script(routine)) => Some(routine.clone()),
            _ => None,
        }
    }

    /// Registers a host-callable function that scripts invoke as
    /// `name(layout)` or `name(layout, "tag")`.
    pub fn register_function(&mut self, name: &str, hook: Rc<dyn Fn(&MenuLayout)>) {
        let tagged = hook.clone();
        self.engine.register_fn(name, move |layout: &mut MenuLayout| hook(layout));
        self.engine.register_fn(name, move |layout: &mut MenuLayout, _tag: ImmutableString| tagged(layout));
    }

    /// The host's generic extension point: `draw` runs after the class's own
    /// draw routine.
    pub fn append_extension(&mut self, class_id: &str, draw: NativeDraw) -> Result<(), HostError> {
        if !self.extensions_enabled {
            return Err(HostError::ClassNotFound(class_id.to_string()));
        }
        if !self.classes.contains_key(class_id) {
            return Err(HostError::ClassNotFound(class_id.to_string()));
        }
        self.extensions.entry(class_id.to_string()).or_default().push(draw);
        Ok(())
    }

    /// Removes an extension previously added with `append_extension`.
    pub fn remove_extension(&mut self, class_id: &str, draw: &NativeDraw) -> bool {
        let Some(extensions) = self.extensions.get_mut(class_id) else { return false };
        let before = extensions.len();
        extensions.retain(|existing| !Rc::ptr_eq(existing, draw));
        before != extensions.len()
    }

    pub fn draw_menu(&self, class_id: &str) -> Result<Vec<LayoutItem>, HostError> {
        self.draw_into(class_id, MenuLayout::new())
    }

    pub fn draw_into(&self, class_id: &str, layout: MenuLayout) -> Result<Vec<LayoutItem>, HostError> {
        let class = self.classes.get(class_id).ok_or_else(|| HostError::ClassNotFound(class_id.to_string()))?;
        match &class.draw {
            ClassDraw::Script(routine) => {
                let mut scope = Scope::new();
                self.engine
                    .call_fn::<Dynamic>(&mut scope, &routine.ast, &routine.name, (layout.clone(),))
                    .map_err(|err| HostError::Script { routine: routine.qualified_name(), message: err.to_string() })?;
            }
            ClassDraw::Native(draw) => {
                draw(&layout)
                    .map_err(|err| HostError::Native { class: class_id.to_string(), message: format!("{err:#}") })?;
            }
        }
        for extension in self.extensions.get(class_id).into_iter().flatten() {
            if let Err(err) = extension(&layout) {
                warn!(class = class_id, "[host] menu extension failed: {err:#}");
            }
        }
        Ok(layout.items())
    }

    /// What the host does when the user opens a menu.
    pub fn open_menu(&self, class_id: &str, at: Option<[f32; 2]>) -> Result<(), HostError> {
        let class = self.classes.get(class_id).ok_or_else(|| HostError::ClassNotFound(class_id.to_string()))?;
        if let Some(on_open) = &class.on_open {
            on_open(at);
        }
        Ok(())
    }
}
