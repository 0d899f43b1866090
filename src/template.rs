//! Placeholder expansion for step arguments.
//!
//! Templates use `{name}` placeholders with `{{`/`}}` escapes. Parameter
//! values may themselves contain placeholders, but not parameter references.
use crate::error::ConfigError;
use crate::matrix::Combination;
use std::path::Path;

const POSARGS: &str = "{posargs}";

/// Values available while expanding one execution's steps.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub root: &'a Path,
    pub tmpdir: &'a Path,
    /// Unset while the dependency set (and so the environment) is unknown.
    pub envdir: Option<&'a Path>,
    pub envtmp: Option<&'a Path>,
    pub runtime: &'a str,
    pub session: &'a str,
    pub combination: &'a Combination,
}

impl TemplateContext<'_> {
    pub fn expand(&self, template: &str) -> Result<String, ConfigError> {
        self.expand_inner(template, true)
    }

    /// Expand an argument list, splicing `{posargs}` and dropping arguments
    /// that consist of a single placeholder expanding to nothing.
    pub fn expand_args(
        &self,
        templates: &[String],
        posargs: &[String],
    ) -> Result<Vec<String>, ConfigError> {
        let mut out = Vec::with_capacity(templates.len());
        for template in templates {
            if template == POSARGS {
                out.extend(posargs.iter().cloned());
                continue;
            }
            let expanded = self.expand(template)?;
            if expanded.is_empty() && is_single_placeholder(template) {
                continue;
            }
            out.push(expanded);
        }
        Ok(out)
    }

    fn expand_inner(&self, template: &str, allow_params: bool) -> Result<String, ConfigError> {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut key = String::new();
                    let mut closed = false;
                    for next in chars.by_ref() {
                        if next == '}' {
                            closed = true;
                            break;
                        }
                        key.push(next);
                    }
                    if !closed {
                        return Err(invalid(template, "unterminated placeholder"));
                    }
                    out.push_str(&self.lookup(template, &key, allow_params)?);
                }
                '}' => return Err(invalid(template, "unmatched '}'")),
                other => out.push(other),
            }
        }
        Ok(out)
    }

    fn lookup(&self, template: &str, key: &str, allow_params: bool) -> Result<String, ConfigError> {
        let path = |value: Option<&Path>, name: &str| {
            value
                .map(|p| p.display().to_string())
                .ok_or_else(|| invalid(template, &format!("{{{name}}} is not available here")))
        };
        match key {
            "root" => Ok(self.root.display().to_string()),
            "tmpdir" => Ok(self.tmpdir.display().to_string()),
            "envdir" => path(self.envdir, "envdir"),
            "envtmp" => path(self.envtmp, "envtmp"),
            "devnull" => Ok(if cfg!(windows) { "NUL" } else { "/dev/null" }.to_string()),
            "runtime" => Ok(self.runtime.to_string()),
            "session" => Ok(self.session.to_string()),
            "posargs" => Err(invalid(template, "{posargs} must be a whole argument")),
            _ => {
                let Some(param) = key.strip_prefix("param.") else {
                    return Err(invalid(template, &format!("unknown placeholder {{{key}}}")));
                };
                if !allow_params {
                    return Err(invalid(template, "parameter values cannot reference parameters"));
                }
                let (axis, var) = match param.split_once('.') {
                    Some((axis, var)) => (axis, Some(var)),
                    None => (param, None),
                };
                let value = self.combination.get(axis).ok_or_else(|| {
                    invalid(template, &format!("session is not bound to axis {axis:?}"))
                })?;
                match var {
                    // Missing vars expand to nothing so per-value flags can be optional.
                    Some(var) => Ok(value.vars.get(var).cloned().unwrap_or_default()),
                    None => self.expand_inner(&value.value, false),
                }
            }
        }
    }
}

fn is_single_placeholder(template: &str) -> bool {
    template.len() > 2
        && template.starts_with('{')
        && !template.starts_with("{{")
        && template.ends_with('}')
        && !template[1..template.len() - 1].contains(['{', '}'])
}

fn invalid(template: &str, reason: &str) -> ConfigError {
    ConfigError::Template {
        template: template.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::ParamValue;
    use std::collections::BTreeMap;

    fn combination() -> Combination {
        let mut vars = BTreeMap::new();
        vars.insert("quiet".to_string(), "-q".to_string());
        Combination {
            bindings: vec![
                (
                    "installable".to_string(),
                    ParamValue {
                        label: "format".to_string(),
                        value: "{root}[format]".to_string(),
                        vars: BTreeMap::new(),
                    },
                ),
                (
                    "builder".to_string(),
                    ParamValue {
                        label: "man".to_string(),
                        value: "man".to_string(),
                        vars,
                    },
                ),
            ],
        }
    }

    fn with_context<T>(f: impl FnOnce(&TemplateContext<'_>) -> T) -> T {
        let combo = combination();
        let ctx = TemplateContext {
            root: Path::new("/repo"),
            tmpdir: Path::new("/tmp/x"),
            envdir: Some(Path::new("/repo/.smx/env")),
            envtmp: None,
            runtime: "3.13",
            session: "docs[man]",
            combination: &combo,
        };
        f(&ctx)
    }

    #[test]
    fn expands_builtin_and_parameter_placeholders() {
        with_context(|ctx| {
            assert_eq!(ctx.expand("{root}/json").unwrap(), "/repo/json");
            assert_eq!(ctx.expand("{param.installable}").unwrap(), "/repo[format]");
            assert_eq!(ctx.expand("{tmpdir}/{param.builder}").unwrap(), "/tmp/x/man");
            assert_eq!(ctx.expand("{{literal}}").unwrap(), "{literal}");
        });
    }

    #[test]
    fn splices_posargs_and_drops_empty_single_placeholders() {
        with_context(|ctx| {
            let templates: Vec<String> = [
                "-b",
                "{param.builder}",
                "{param.builder.color}",
                "{posargs}",
                "{param.builder.quiet}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect();
            let args = ctx
                .expand_args(&templates, &["-W".to_string(), "out".to_string()])
                .unwrap();
            assert_eq!(args, vec!["-b", "man", "-W", "out", "-q"]);
        });
    }

    #[test]
    fn rejects_unknown_and_unavailable_placeholders() {
        with_context(|ctx| {
            assert!(matches!(ctx.expand("{nope}"), Err(ConfigError::Template { .. })));
            assert!(ctx.expand("{envtmp}/out.json").is_err());
            assert!(ctx.expand("{param.benchmark}").is_err());
            assert!(ctx.expand("x{posargs}").is_err());
            assert!(ctx.expand("{root").is_err());
            assert!(ctx.expand("root}").is_err());
        });
    }
}
