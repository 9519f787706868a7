//! Module import: registry lookup, path resolution and script loading.

use crate::config::CompileOptions;
use crate::error::VmError;
use crate::gc::ObjRef;

use super::Vm;

impl Vm {
    /// Return the module imported as `path` from the module at `from`.
    ///
    /// Paths starting with `./` or `../` are only resolved relative to the
    /// importer. Other paths are first looked up in the registry, which
    /// holds the native modules and every script imported so far.
    pub(crate) fn import_module(
        &mut self,
        from: Option<&str>,
        path: &str,
    ) -> Result<ObjRef, VmError> {
        let is_relative = path.starts_with('.');
        if !is_relative {
            if let Some(module) = self.modules.get(path) {
                return Ok(*module);
            }
        }

        let resolved = self
            .resolve_import(from, path)
            .ok_or_else(|| VmError::new(format!("Cannot import module '{}'", path)))?;
        tracing::debug!(path, resolved = %resolved, "resolved import");

        if let Some(module) = self.modules.get(&resolved) {
            return Ok(*module);
        }

        if self.config.load_script_fn.is_none() {
            return Err(VmError::new(
                "Cannot import. The hosting application haven't registered the module loading API",
            ));
        }
        let name = path.replace('/', ".");
        self.import_script(&resolved, &name)
    }

    /// Try the importer's location first, then every search path in order.
    fn resolve_import(&self, from: Option<&str>, path: &str) -> Option<String> {
        let resolve = self.config.resolve_path_fn.as_ref()?;
        if let Some(resolved) = resolve(from, path) {
            return Some(resolved);
        }
        self.search_paths
            .iter()
            .find_map(|dir| resolve(Some(dir.as_str()), path))
    }

    fn import_script(&mut self, resolved: &str, name: &str) -> Result<ObjRef, VmError> {
        let source = self
            .config
            .load_script_fn
            .as_ref()
            .and_then(|load| load(resolved))
            .ok_or_else(|| VmError::new(format!("Error loading module at \"{}\"", resolved)))?;

        let module = self.create_module(name, Some(resolved));
        let mut vm = self.protect(module);
        if vm.compile(module, &source, &CompileOptions::default()).is_err() {
            return Err(VmError::new(format!(
                "Error compiling module at \"{}\"",
                resolved
            )));
        }
        vm.register_module(resolved, module);
        tracing::debug!(module = name, path = resolved, "imported script");
        Ok(module)
    }
}
