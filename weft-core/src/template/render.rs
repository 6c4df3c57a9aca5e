//! Rendering through minijinja, with template lookup confined to the
//! configured roots and library errors mapped onto [`TemplateError`].

use std::path::{Path, PathBuf};

use minijinja::{AutoEscape, ErrorKind, UndefinedBehavior};

use super::resolver::Resolver;
use crate::config::RenderOptions;
use crate::data::DataContext;
use crate::error::TemplateError;

/// Loader miss, carried as the source of minijinja's not-found error so the
/// missing name survives into [`TemplateError`].
#[derive(Debug, thiserror::Error)]
#[error("`{0}` is not in any template root")]
struct NotInRoots(String);

/// Renders templates against a [`DataContext`].
///
/// Each render gets a fresh minijinja environment, so edits to layouts and
/// partials are picked up by the next build without any cache to invalidate.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    resolver: Resolver,
    options: RenderOptions,
}

/// The page being rendered, kept for error reporting.
struct Entry<'a> {
    name: &'a str,
    source: &'a str,
}

impl Environment {
    pub fn new(resolver: Resolver, options: RenderOptions) -> Self {
        Self { resolver, options }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Read and render the entry page at `path`, naming it `name` in errors.
    pub fn render_file(&self, name: &str, path: &Path, data: &DataContext) -> Result<String, TemplateError> {
        let source = std::fs::read_to_string(path).map_err(|e| TemplateError::Io(path.to_path_buf(), e))?;
        self.render_source(name, &source, data)
    }

    /// Render the template called `name` in the template roots.
    pub fn render_template(&self, name: &str, data: &DataContext) -> Result<String, TemplateError> {
        let path = self.resolver.resolve(name).ok_or_else(|| {
            let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "not in any template root");
            TemplateError::Io(PathBuf::from(name), missing)
        })?;
        self.render_file(name, &path, data)
    }

    /// Render template text that does not live in a file.
    pub fn render_source(&self, name: &str, source: &str, data: &DataContext) -> Result<String, TemplateError> {
        match self.engine().render_named_str(name, source, data) {
            Ok(output) => {
                tracing::trace!(template = name, bytes = output.len(), "rendered template");
                Ok(output)
            }
            Err(err) => Err(self.convert(&err, &Entry { name, source })),
        }
    }

    fn engine(&self) -> minijinja::Environment<'static> {
        let mut engine = minijinja::Environment::new();
        engine.set_keep_trailing_newline(true);
        engine.set_recursion_limit(self.options.max_depth);

        let autoescape = self.options.autoescape;
        engine.set_auto_escape_callback(move |_| {
            if autoescape {
                AutoEscape::Html
            } else {
                AutoEscape::None
            }
        });
        engine.set_undefined_behavior(if self.options.strict_undefined {
            UndefinedBehavior::Strict
        } else {
            UndefinedBehavior::Chainable
        });

        let resolver = self.resolver.clone();
        engine.set_loader(move |name| match resolver.resolve(name) {
            Some(path) => std::fs::read_to_string(&path).map(Some).map_err(|e| {
                minijinja::Error::new(
                    ErrorKind::InvalidOperation,
                    format!("cannot read template `{}`", path.display()),
                )
                .with_source(e)
            }),
            None => Err(minijinja::Error::new(
                ErrorKind::TemplateNotFound,
                format!("template `{name}` is not in any template root"),
            )
            .with_source(NotInRoots(name.to_string()))),
        });

        engine
    }

    fn convert(&self, err: &minijinja::Error, entry: &Entry<'_>) -> TemplateError {
        let template = err.name().unwrap_or(entry.name).to_string();
        let line = err.line().unwrap_or(0);
        let message = err.detail().map_or_else(|| err.kind().to_string(), str::to_string);
        tracing::debug!(template = %template, line, kind = ?err.kind(), "template error: {message}");

        let missing = std::iter::successors(Some(err as &(dyn std::error::Error + 'static)), |e| e.source())
            .find_map(|e| e.downcast_ref::<NotInRoots>());
        if let Some(NotInRoots(target)) = missing {
            let target = target.clone();
            let code = self.line_of(&template, line, entry).unwrap_or_default();
            return match directive(&code, &target) {
                Directive::Extends => TemplateError::ExtendsResolution { template, target },
                Directive::Import => TemplateError::ImportResolution { template, target },
                Directive::Include => TemplateError::IncludeResolution { template, target },
            };
        }

        match err.kind() {
            ErrorKind::SyntaxError
            | ErrorKind::BadEscape
            | ErrorKind::UnknownFilter
            | ErrorKind::UnknownTest
            | ErrorKind::UnknownBlock => TemplateError::Syntax {
                template,
                line,
                message,
            },
            ErrorKind::UnknownFunction | ErrorKind::UnknownMethod => TemplateError::MacroInvocation {
                template,
                line,
                message,
            },
            ErrorKind::UndefinedError => {
                let message = match self.line_of(&template, line, entry) {
                    Some(code) => format!("{message} in `{}`", code.trim()),
                    None => message,
                };
                TemplateError::UndefinedVariable {
                    template,
                    line,
                    message,
                }
            }
            _ if message.contains("recursion limit") || message.contains("cycle") => {
                TemplateError::RecursionLimit { template }
            }
            _ => TemplateError::Render {
                template,
                line,
                message,
            },
        }
    }

    /// Text of line `line` (1-based) of the template called `name`.
    fn line_of(&self, name: &str, line: usize, entry: &Entry<'_>) -> Option<String> {
        let index = line.checked_sub(1)?;
        if name == entry.name {
            return entry.source.lines().nth(index).map(str::to_string);
        }
        let source = std::fs::read_to_string(self.resolver.resolve(name)?).ok()?;
        source.lines().nth(index).map(str::to_string)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Directive {
    Extends,
    Include,
    Import,
}

/// Which tag on `code` refers to `target`. Falls back to the first tag on the
/// line, then to `include`.
fn directive(code: &str, target: &str) -> Directive {
    let tags: Vec<&str> = code
        .split("{%")
        .skip(1)
        .map(|tag| tag.split("%}").next().unwrap_or(tag))
        .collect();
    let quoted = [format!("\"{target}\""), format!("'{target}'")];
    let tag = tags
        .iter()
        .find(|tag| quoted.iter().any(|q| tag.contains(q.as_str())))
        .or_else(|| tags.first());

    let keyword = tag
        .map(|tag| tag.trim_start_matches(['-', '+']).trim_start())
        .and_then(|tag| tag.split_whitespace().next())
        .unwrap_or_default();
    match keyword {
        "extends" => Directive::Extends,
        "import" | "from" => Directive::Import,
        _ => Directive::Include,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(files: &[(&str, &str)]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            for (name, source) in files {
                let path = dir.path().join(name);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(path, source).unwrap();
            }
            Self { dir }
        }

        fn env(&self, options: RenderOptions) -> Environment {
            Environment::new(Resolver::new([self.dir.path().join("templates")]), options)
        }

        fn render(&self, source: &str, data: serde_json::Value) -> Result<String, TemplateError> {
            let data = DataContext::from_json(data).unwrap();
            self.env(RenderOptions::default()).render_source("page.njk", source, &data)
        }
    }

    fn render(source: &str, data: serde_json::Value) -> String {
        Fixture::new(&[]).render(source, data).unwrap()
    }

    #[test]
    fn test_literal_text_passes_through() {
        assert_eq!(render("<p>plain & simple</p>\n", json!({})), "<p>plain & simple</p>\n");
        assert_eq!(render("<p>café “quoted” ✓</p>", json!({})), "<p>café “quoted” ✓</p>");
    }

    #[test]
    fn test_output_is_escaped_unless_safe() {
        let data = json!({"title": "<b>Tom & Jerry</b>"});
        let escaped = render("{{ title }}", data.clone());
        assert!(escaped.starts_with("&lt;b&gt;Tom &amp; Jerry&lt;"));
        assert!(!escaped.contains('<'));
        assert_eq!(render("{{ title | safe }}", data.clone()), "<b>Tom & Jerry</b>");

        let fixture = Fixture::new(&[]);
        let env = fixture.env(RenderOptions {
            autoescape: false,
            ..RenderOptions::default()
        });
        let data = DataContext::from_json(data).unwrap();
        assert_eq!(env.render_source("page.njk", "{{ title }}", &data).unwrap(), "<b>Tom & Jerry</b>");
    }

    #[test]
    fn test_undefined_renders_empty_unless_strict() {
        assert_eq!(render("[{{ missing }}][{{ missing.deep }}]", json!({})), "[][]");

        let fixture = Fixture::new(&[]);
        let env = fixture.env(RenderOptions {
            strict_undefined: true,
            ..RenderOptions::default()
        });
        let err = env
            .render_source("page.njk", "line one\n{{ missing }}", &DataContext::new())
            .unwrap_err();
        assert!(matches!(
            err,
            TemplateError::UndefinedVariable { ref message, line: 2, ref template }
                if message.contains("missing") && template == "page.njk"
        ));
        assert_eq!(
            env.render_source("page.njk", "{{ missing | default('x') }}", &DataContext::new())
                .unwrap(),
            "x"
        );
    }

    #[test]
    fn test_loop_over_images() {
        let data = json!({
            "images": [
                {"src": "a.png", "alt": "First"},
                {"src": "b.png", "alt": "Second"}
            ]
        });
        let source = "{% for image in images %}<img src=\"{{ image.src }}\" alt=\"{{ image.alt }}\">{% endfor %}";
        assert_eq!(
            render(source, data),
            "<img src=\"a.png\" alt=\"First\"><img src=\"b.png\" alt=\"Second\">"
        );
    }

    #[test]
    fn test_loop_variables_and_else() {
        let source = "{% for n in items %}{{ loop.index }}/{{ loop.length }}{% if not loop.last %},{% endif %}{% else %}none{% endfor %}";
        assert_eq!(render(source, json!({"items": ["a", "b", "c"]})), "1/3,2/3,3/3");
        assert_eq!(render(source, json!({"items": []})), "none");
        assert_eq!(render(source, json!({})), "none");
        assert_eq!(
            render(
                "{% for k, v in meta | items %}{{ k }}={{ v }};{% endfor %}",
                json!({"meta": {"b": 2, "a": 1}})
            ),
            "a=1;b=2;"
        );
    }

    #[test]
    fn test_loop_variable_does_not_leak() {
        assert_eq!(
            render("{% for x in [1, 2] %}{% endfor %}[{{ x }}]", json!({"x": "outer"})),
            "[outer]"
        );
    }

    #[test]
    fn test_set_and_set_block() {
        assert_eq!(render("{% set n = 2 * 3 %}{{ n }}", json!({})), "6");
        assert_eq!(
            render("{% set nav %}<a>{{ who }}</a>{% endset %}{{ nav }}", json!({"who": "<me>"})),
            "<a>&lt;me&gt;</a>"
        );
    }

    #[test]
    fn test_extends_and_blocks() {
        let fixture = Fixture::new(&[(
            "templates/layout.njk",
            "<title>{% block title %}Site{% endblock %}</title><main>{% block body %}{% endblock %}</main>",
        )]);
        let out = fixture
            .render(
                "{% extends \"layout.njk\" %}{% block body %}Hello {{ name }}{% endblock %}",
                json!({"name": "Ada"}),
            )
            .unwrap();
        assert_eq!(out, "<title>Site</title><main>Hello Ada</main>");
    }

    #[test]
    fn test_multi_level_inheritance_and_super() {
        let fixture = Fixture::new(&[
            ("templates/base.njk", "[{% block body %}base{% endblock %}]"),
            (
                "templates/section.njk",
                "{% extends \"base.njk\" %}{% block body %}section+{{ super() }}{% endblock %}",
            ),
        ]);
        let out = fixture
            .render(
                "{% extends \"section.njk\" %}{% block body %}page+{{ super() }}{% endblock %}",
                json!({}),
            )
            .unwrap();
        assert_eq!(out, "[page+section+base]");
    }

    #[test]
    fn test_child_top_level_set_is_visible_to_layout() {
        let fixture = Fixture::new(&[("templates/layout.njk", "{{ activePage }}:{% block body %}{% endblock %}")]);
        let out = fixture
            .render(
                "{% extends \"layout.njk\" %}{% set activePage = \"about\" %}ignored{% block body %}x{% endblock %}",
                json!({}),
            )
            .unwrap();
        assert_eq!(out, "about:x");
    }

    #[test]
    fn test_block_without_slot_is_inert() {
        let fixture = Fixture::new(&[("templates/layout.njk", "<{% block body %}{% endblock %}>")]);
        let out = fixture
            .render(
                "{% extends \"layout.njk\" %}{% block sidebar %}lost{% endblock %}{% block body %}kept{% endblock %}",
                json!({}),
            )
            .unwrap();
        assert_eq!(out, "<kept>");
    }

    #[test]
    fn test_include_sees_caller_variables() {
        let fixture = Fixture::new(&[("templates/partials/card.njk", "<div>{{ item }}</div>")]);
        let out = fixture
            .render(
                "{% for item in items %}{% include \"partials/card.njk\" %}{% endfor %}",
                json!({"items": ["a", "b"]}),
            )
            .unwrap();
        assert_eq!(out, "<div>a</div><div>b</div>");
    }

    #[test]
    fn test_include_missing() {
        let fixture = Fixture::new(&[]);
        let err = fixture.render("{% include \"nope.njk\" %}", json!({})).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::IncludeResolution { ref target, ref template }
                if target == "nope.njk" && template == "page.njk"
        ));
        assert_eq!(
            fixture.render("a{% include \"nope.njk\" ignore missing %}b", json!({})).unwrap(),
            "ab"
        );
    }

    #[test]
    fn test_missing_parent() {
        let err = Fixture::new(&[]).render("{% extends \"gone.njk\" %}", json!({})).unwrap_err();
        assert!(matches!(err, TemplateError::ExtendsResolution { ref target, .. } if target == "gone.njk"));
    }

    #[test]
    fn test_missing_reference_is_reported_from_the_nested_file() {
        let fixture = Fixture::new(&[(
            "templates/layout.njk",
            "<body>\n{% include \"partials/footer.njk\" %}</body>",
        )]);
        let err = fixture.render("{% extends \"layout.njk\" %}", json!({})).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::IncludeResolution { ref template, ref target }
                if template == "layout.njk" && target == "partials/footer.njk"
        ));
    }

    #[test]
    fn test_names_outside_the_roots_are_rejected() {
        let fixture = Fixture::new(&[("secret.njk", "secret"), ("templates/ok.njk", "ok")]);
        let outside = fixture.dir.path().join("secret.njk");
        let absolute = outside.to_string_lossy().to_string();

        let err = fixture.render("{% include \"../secret.njk\" %}", json!({})).unwrap_err();
        assert!(matches!(err, TemplateError::IncludeResolution { ref target, .. } if target == "../secret.njk"));

        let err = fixture
            .render(&format!("{{% extends \"{absolute}\" %}}"), json!({}))
            .unwrap_err();
        assert!(matches!(err, TemplateError::ExtendsResolution { ref target, .. } if *target == absolute));

        let err = fixture
            .render("{% import \"../secret.njk\" as secret %}{{ secret }}", json!({}))
            .unwrap_err();
        assert!(matches!(err, TemplateError::ImportResolution { .. }));

        let err = fixture
            .render("{% from \"sub/../../secret.njk\" import x %}", json!({}))
            .unwrap_err();
        assert!(matches!(err, TemplateError::ImportResolution { .. }));

        assert_eq!(fixture.render("{% include \"./ok.njk\" %}", json!({})).unwrap(), "ok");
    }

    #[test]
    fn test_cyclic_include_hits_recursion_limit() {
        let fixture = Fixture::new(&[("templates/loop.njk", "{% include \"loop.njk\" %}")]);
        let err = fixture.render("{% include \"loop.njk\" %}", json!({})).unwrap_err();
        assert!(matches!(err, TemplateError::RecursionLimit { .. }));

        let shallow = fixture.env(RenderOptions {
            max_depth: 50,
            ..RenderOptions::default()
        });
        let err = shallow
            .render_source("page.njk", "{% include \"loop.njk\" %}", &DataContext::new())
            .unwrap_err();
        assert!(matches!(err, TemplateError::RecursionLimit { .. }));
    }

    #[test]
    fn test_cyclic_extends_is_an_error() {
        let fixture = Fixture::new(&[
            ("templates/a.njk", "{% extends \"b.njk\" %}"),
            ("templates/b.njk", "{% extends \"a.njk\" %}"),
        ]);
        assert!(fixture.render("{% extends \"a.njk\" %}", json!({})).is_err());
    }

    const NAV: &str = r#"{% macro active(activePage="home") %}<nav>{% if activePage == "home" %}<b>Home</b>{% else %}<a>Home</a>{% endif %}</nav>{% endmacro %}"#;

    #[test]
    fn test_macro_defaults_match_explicit_arguments() {
        let fixture = Fixture::new(&[("templates/macros/nav.njk", NAV)]);
        let implicit = fixture
            .render("{% import \"macros/nav.njk\" as nav %}{{ nav.active() }}", json!({}))
            .unwrap();
        let explicit = fixture
            .render(
                "{% import \"macros/nav.njk\" as nav %}{{ nav.active(activePage=\"home\") }}",
                json!({}),
            )
            .unwrap();
        assert_eq!(implicit, "<nav><b>Home</b></nav>");
        assert_eq!(implicit, explicit);

        let about = fixture
            .render("{% import \"macros/nav.njk\" as nav %}{{ nav.active(\"about\") }}", json!({}))
            .unwrap();
        assert_eq!(about, "<nav><a>Home</a></nav>");
    }

    #[test]
    fn test_from_import_with_alias() {
        let fixture = Fixture::new(&[("templates/macros/nav.njk", NAV)]);
        let out = fixture
            .render(
                "{% from \"macros/nav.njk\" import active as current %}{{ current(\"x\") }}",
                json!({}),
            )
            .unwrap();
        assert_eq!(out, "<nav><a>Home</a></nav>");
    }

    #[test]
    fn test_macro_resolution_errors() {
        let fixture = Fixture::new(&[("templates/macros/nav.njk", NAV)]);
        let err = fixture
            .render("{% import \"macros/nav.njk\" as nav %}\n{{ nav.missing() }}", json!({}))
            .unwrap_err();
        assert!(matches!(err, TemplateError::MacroInvocation { line: 2, .. }), "{err:?}");

        let err = fixture.render("{% import \"macros/gone.njk\" as x %}", json!({})).unwrap_err();
        assert!(matches!(err, TemplateError::ImportResolution { ref target, .. } if target == "macros/gone.njk"));
    }

    #[test]
    fn test_expressions() {
        let data = json!({"user": {"name": "ada", "roles": ["admin"]}, "count": 3});
        assert_eq!(render("{{ user.name | upper }}", data.clone()), "ADA");
        assert_eq!(render("{{ user['name'] ~ '!' }}", data.clone()), "ada!");
        assert_eq!(render("{{ user.roles[0] }}", data.clone()), "admin");
        assert_eq!(render("{{ 'yes' if 'admin' in user.roles else 'no' }}", data.clone()), "yes");
        assert_eq!(render("{{ count is odd }}", data.clone()), "true");
        assert_eq!(render("{{ missing or 'fallback' }}", data.clone()), "fallback");
        assert_eq!(render("{{ (count + 1) * 2 }}", data), "8");
    }

    #[test]
    fn test_non_ascii_inside_tags_is_a_syntax_error() {
        let fixture = Fixture::new(&[]);
        for source in ["{{ “quoted” }}", "{% if ✓ %}x{% endif %}", "{{ 'a' ≠ 'b' }}"] {
            let err = fixture.render(source, json!({})).unwrap_err();
            assert!(matches!(err, TemplateError::Syntax { line: 1, .. }), "{source}: {err:?}");
        }
        // Identifier rules depend on the engine's unicode support; either way it is no panic.
        assert!(matches!(
            fixture.render("{{ café }}", json!({})),
            Ok(_) | Err(TemplateError::Syntax { .. })
        ));
        assert_eq!(render("{{ 'café' | upper }}", json!({})), "CAFÉ");
    }

    #[test]
    fn test_integer_edges_do_not_panic() {
        let fixture = Fixture::new(&[]);
        let data = json!({"n": i64::MIN});
        for source in ["{{ -n }}", "{{ n // -1 }}", "{{ n % -1 }}", "{{ n | abs }}", "{{ n - 1 }}"] {
            match fixture.render(source, data.clone()) {
                Ok(out) => assert!(!out.is_empty(), "{source}"),
                Err(err) => assert!(matches!(err, TemplateError::Render { .. }), "{source}: {err:?}"),
            }
        }
        assert!(matches!(
            fixture.render("{{ 1 // 0 }}", json!({})),
            Err(TemplateError::Render { .. })
        ));
    }

    #[test]
    fn test_render_template_by_name() {
        let fixture = Fixture::new(&[("templates/emails/welcome.njk", "Hi {{ name }}")]);
        let env = fixture.env(RenderOptions::default());
        let data = DataContext::from_json(json!({"name": "Ada"})).unwrap();
        assert_eq!(env.render_template("emails/welcome.njk", &data).unwrap(), "Hi Ada");
        assert!(matches!(
            env.render_template("emails/missing.njk", &data),
            Err(TemplateError::Io(..))
        ));
    }

    #[test]
    fn test_render_errors_carry_location() {
        let err = Fixture::new(&[]).render("\n\n{{ 1 // 0 }}", json!({})).unwrap_err();
        assert!(matches!(err, TemplateError::Render { line: 3, ref template, .. } if template == "page.njk"));

        let err = Fixture::new(&[]).render("ok\n{% if %}", json!({})).unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { line: 2, .. }));
    }

    #[test]
    fn test_directive_for_missing_target() {
        assert_eq!(directive("{% extends \"a.njk\" %}", "a.njk"), Directive::Extends);
        assert_eq!(
            directive("{% extends \"a.njk\" %}{%- import 'm.njk' as m %}", "m.njk"),
            Directive::Import
        );
        assert_eq!(directive("{% from \"m.njk\" import x %}", "m.njk"), Directive::Import);
        assert_eq!(directive("{% include \"p.njk\" %}", "p.njk"), Directive::Include);
        assert_eq!(directive("", "p.njk"), Directive::Include);
    }
}
