//! Code emission and the declaration check

use super::util::{load_config, write_output};
use facetgen::{
    build_model, generate_all, render_model, Diagnostic, Error, GenerationModel, Manifest,
    RenderConfig, Result, Severity,
};
use facetgen::{DefaultsConfig, Generated};
use std::path::PathBuf;

pub struct GenerateArgs {
    pub manifest: PathBuf,
    pub facet: Option<String>,
    pub output: Option<PathBuf>,
    pub stdout: bool,
    pub no_format: bool,
    pub config: Option<PathBuf>,
}

/// One emitted file
pub struct Emitted {
    pub facet: String,
    pub code: String,
}

/// Build and render; declarations that fail are reported, the rest emitted
pub fn emit(
    manifest: &Manifest,
    defaults: &DefaultsConfig,
    only: Option<&str>,
    render: &RenderConfig,
) -> Result<(Vec<Emitted>, Vec<Diagnostic>)> {
    let (models, mut diagnostics) = match only {
        Some(facet) => (vec![build_model(manifest, facet, defaults)?], Vec::new()),
        None => {
            let Generated {
                models,
                diagnostics,
            } = generate_all(manifest, defaults);
            (models, diagnostics)
        }
    };

    let mut emitted = Vec::new();
    for model in &models {
        match render_model(model, render) {
            Ok(code) => emitted.push(Emitted {
                facet: model.root.name.clone(),
                code,
            }),
            Err(e) if only.is_some() => return Err(e),
            Err(e) => diagnostics.push(render_diagnostic(model, &e)),
        }
    }
    Ok((emitted, diagnostics))
}

fn render_diagnostic(model: &GenerationModel, error: &Error) -> Diagnostic {
    Diagnostic {
        facet: model.root.name.clone(),
        severity: Severity::Error,
        code: "render".to_string(),
        message: error.to_string(),
    }
}

pub fn cmd_generate(args: &GenerateArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let manifest = Manifest::load(&args.manifest)?;

    let mut output = config.output.clone();
    if let Some(dir) = &args.output {
        output.dir = dir.clone();
    }
    let mut render = RenderConfig::from_defaults(&config.defaults);
    if args.no_format {
        render.format = false;
    }

    let (emitted, diagnostics) = emit(&manifest, &config.defaults, args.facet.as_deref(), &render)?;
    for file in &emitted {
        if args.stdout {
            write_output(None, &file.code)?;
        } else {
            write_output(Some(&output.path_for(&file.facet)), &file.code)?;
        }
    }

    for diagnostic in &diagnostics {
        eprintln!("{}", diagnostic);
    }
    let failed = count_errors(&diagnostics);
    if failed > 0 {
        return Err(format!("{} declaration(s) failed, {} emitted", failed, emitted.len()).into());
    }
    if !args.stdout {
        eprintln!("Generated {} facet(s) in {}", emitted.len(), output.dir.display());
    }
    Ok(())
}

fn count_errors(diagnostics: &[Diagnostic]) -> usize {
    diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count()
}

/// Human or JSON report of every declaration's outcome
pub fn check_report(manifest: &Manifest, generated: &Generated, json: bool) -> Result<String> {
    if json {
        let facets: Vec<_> = manifest
            .facets
            .iter()
            .map(|decl| {
                let ok = generated.models.iter().any(|m| m.root.name == decl.name);
                serde_json::json!({ "facet": decl.name, "ok": ok })
            })
            .collect();
        let report = serde_json::json!({
            "valid": !generated.has_errors(),
            "errors": count_errors(&generated.diagnostics),
            "facets": facets,
            "diagnostics": generated.diagnostics,
        });
        return Ok(serde_json::to_string_pretty(&report)?);
    }

    let mut out = String::new();
    for model in &generated.models {
        out.push_str(&format!(
            "ok   {} ({} member(s), {} related facet(s))\n",
            model.root.name,
            model.root.members.len(),
            model.related.len()
        ));
    }
    for diagnostic in &generated.diagnostics {
        out.push_str(&format!("{}\n", diagnostic));
    }
    Ok(out)
}

pub fn cmd_check(manifest: &std::path::Path, json: bool, config: Option<&std::path::Path>) -> Result<()> {
    let config = load_config(config)?;
    let manifest = Manifest::load(manifest)?;
    let generated = generate_all(&manifest, &config.defaults);

    print!("{}", check_report(&manifest, &generated, json)?);
    if json {
        println!();
    }

    if generated.has_errors() {
        Err(format!("{} declaration(s) failed", count_errors(&generated.diagnostics)).into())
    } else {
        Ok(())
    }
}
