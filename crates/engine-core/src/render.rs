use crate::error::RenderError;
use minijinja::{Environment, ErrorKind, UndefinedBehavior, path_loader};
use model::execution::context::QueryContext;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Expands `{{ var }}` templates loaded from a search root into SQL text.
///
/// Rendering is strict: a variable missing from the context is an error, not
/// an empty string. Output is not escaped, so templates and their inputs
/// must be trusted.
pub struct QueryRenderer {
    env: Environment<'static>,
    root: PathBuf,
}

impl QueryRenderer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut env = Environment::new();
        env.set_loader(path_loader(&root));
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        Self { env, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn render(&self, template: &str, context: &QueryContext) -> Result<String, RenderError> {
        let tmpl = self.env.get_template(template).map_err(|err| match err.kind() {
            ErrorKind::TemplateNotFound => RenderError::TemplateNotFound {
                template: template.to_string(),
                root: self.root.display().to_string(),
            },
            _ => RenderError::Invalid {
                template: template.to_string(),
                detail: err.to_string(),
            },
        })?;

        let sql = tmpl.render(context.vars()).map_err(|err| match err.kind() {
            ErrorKind::UndefinedError => RenderError::TemplateVariableMissing {
                template: template.to_string(),
                detail: err.to_string(),
            },
            _ => RenderError::Invalid {
                template: template.to_string(),
                detail: err.to_string(),
            },
        })?;

        debug!(template, %sql, "Rendered query");
        Ok(sql)
    }
}
