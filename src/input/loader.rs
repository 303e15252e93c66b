//! Reading and decoding every configured input
//!
//! Files are read and decoded in parallel using rayon. Generated types are
//! resolved afterwards, once the definitions of every CIL file are known.

use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{DecompileSection, PassesConfig};
use crate::engine::Decompiler;
use crate::error::{DecompileError, ParseError};
use crate::input::file_walker::{InputKind, resolve_inputs};
use crate::macros::{MacroDefinition, MacroLibrary, split_definitions};
use crate::policy::{
    CilPolicy, Classmap, Contexts, ContextsType, TypeResolver, VersionedNaming, parse_cil,
    parse_contexts, parse_genfs_contexts, parse_source,
};
use crate::types::{Rule, RulePart, RuleType};

/// Attribute every compiled module declares for its requirements
const CIL_GEN_REQUIRE: &str = "cil_gen_require";

/// Decoded inputs, ready to decompile
#[derive(Debug, Default)]
pub struct LoadedInputs {
    /// Rules of the policy being decompiled
    pub policy: Vec<Rule>,
    /// `genfscon` rules of the policy
    pub genfs: Vec<Rule>,
    /// Rules of platform policy and policy sources
    pub known: Vec<Rule>,
    /// `genfscon` rules of the policy sources
    pub known_genfs: Vec<Rule>,
    /// Context file entries of the policy
    pub contexts: Contexts,
    /// Context file entries of the policy sources
    pub known_contexts: Contexts,
    pub library: MacroLibrary,
    pub classmap: Option<Classmap>,
    /// Generated types referenced but never defined
    pub unresolved_types: Vec<String>,
}

impl LoadedInputs {
    pub fn into_decompiler(self, passes: PassesConfig) -> Decompiler {
        let decompiler = Decompiler::new(self.policy, self.library)
            .with_known(self.known)
            .with_genfs(self.genfs, self.known_genfs)
            .with_contexts(self.contexts, self.known_contexts)
            .with_passes(passes);
        match self.classmap {
            Some(classmap) => decompiler.with_classmap(classmap),
            None => decompiler,
        }
    }
}

fn source_name(path: &Path) -> String {
    path.display().to_string()
}

/// Read every file, in parallel, keeping the input order
fn read_all(paths: &[PathBuf]) -> Result<Vec<(String, String)>, DecompileError> {
    paths
        .par_iter()
        .map(|path| {
            fs::read_to_string(path)
                .map(|text| (source_name(path), text))
                .map_err(|source| DecompileError::Read {
                    path: path.clone(),
                    source,
                })
        })
        .collect()
}

/// Read and decode the class map
pub fn load_classmap(path: &Path) -> Result<Classmap, DecompileError> {
    let text = fs::read_to_string(path).map_err(|source| DecompileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Classmap::parse(&text, &source_name(path))?)
}

/// Read every macro definition of the given files
pub fn load_definitions(paths: &[PathBuf]) -> Result<Vec<MacroDefinition>, DecompileError> {
    let files = read_all(paths)?;
    let per_file = files
        .par_iter()
        .map(|(name, text)| split_definitions(text, name))
        .collect::<Result<Vec<_>, ParseError>>()?;
    Ok(per_file.into_iter().flatten().collect())
}

/// Read context files, grouped by the kind their file names give
pub fn load_contexts(paths: &[PathBuf]) -> Result<Contexts, DecompileError> {
    let mut contexts = Contexts::new();
    for (path, (name, text)) in paths.iter().zip(read_all(paths)?) {
        let kind = path
            .file_name()
            .and_then(|file_name| file_name.to_str())
            .and_then(ContextsType::from_file_name);
        match kind {
            Some(kind) => contexts.add(kind, parse_contexts(&text)),
            None => warn!("{}: not a known context file, skipped", name),
        }
    }
    Ok(contexts)
}

/// Decode CIL files and resolve their generated types together
fn load_cil(
    files: &[(String, String)],
    naming: &VersionedNaming,
    resolver: &mut TypeResolver,
) -> Result<CilPolicy, DecompileError> {
    let decoded = files
        .par_iter()
        .map(|(name, text)| parse_cil(text, name, naming).map(|policy| (name, policy)))
        .collect::<Result<Vec<_>, ParseError>>()?;

    let mut merged = CilPolicy::default();
    for (name, policy) in decoded {
        for definition in &policy.definitions {
            resolver
                .define(definition.name.clone(), definition.expr.clone())
                .map_err(|kind| ParseError::new(name.as_str(), definition.line, kind))?;
        }
        merged.extend(policy);
    }
    Ok(merged)
}

/// Resolve, read and decode every input named by `section`
pub fn load(section: &DecompileSection) -> Result<LoadedInputs, DecompileError> {
    let exclude = &section.exclude;
    let naming = VersionedNaming::new(section.policy_version.as_deref())
        .with_generated_prefix(section.generated_type_prefix.clone());

    let classmap = section
        .access_vectors
        .as_deref()
        .map(load_classmap)
        .transpose()?;

    let policy_files = resolve_inputs(&section.policy, InputKind::Cil, exclude)?;
    let platform_files = resolve_inputs(&section.platform, InputKind::Cil, exclude)?;
    let macro_files = resolve_inputs(&section.macros, InputKind::Macros, exclude)?;
    let source_files = resolve_inputs(&section.rules, InputKind::Source, exclude)?;

    // Source directories usually carry their genfs_contexts next to the .te files
    let mut genfs_paths = section.genfs_contexts.clone();
    genfs_paths.extend(section.rules.iter().filter(|p| p.is_dir()).cloned());
    let genfs_files = resolve_inputs(&genfs_paths, InputKind::GenfsContexts, exclude)?;

    // Compiled policy directories carry their context files next to the .cil files
    let mut context_paths = section.contexts.clone();
    context_paths.extend(section.policy.iter().filter(|p| p.is_dir()).cloned());
    let context_files = resolve_inputs(&context_paths, InputKind::Contexts, exclude)?;

    let mut source_context_paths = section.source_contexts.clone();
    source_context_paths.extend(section.rules.iter().filter(|p| p.is_dir()).cloned());
    let source_context_files = resolve_inputs(&source_context_paths, InputKind::Contexts, exclude)?;

    info!(
        "Inputs: {} policy, {} platform, {} macro, {} source, {} genfs_contexts, {} context, {} source context files",
        policy_files.len(),
        platform_files.len(),
        macro_files.len(),
        source_files.len(),
        genfs_files.len(),
        context_files.len(),
        source_context_files.len()
    );

    let mut resolver = TypeResolver::new();
    let platform = load_cil(&read_all(&platform_files)?, &naming, &mut resolver)?;
    let policy = load_cil(&read_all(&policy_files)?, &naming, &mut resolver)?;

    // .te files may define macros of their own
    let mut definition_files = macro_files;
    definition_files.extend(source_files.iter().cloned());
    let library = MacroLibrary::from_definitions(load_definitions(&definition_files)?, classmap.as_ref());
    info!(
        "Macro library: {} templates, {} permission sets, {} class sets, {} ioctl sets",
        library.templates.len(),
        library.perms.len(),
        library.class_sets.len(),
        library.ioctls.len()
    );

    let sources = read_all(&source_files)?;
    let source_rules = sources
        .par_iter()
        .map(|(name, text)| parse_source(text, name, classmap.as_ref()))
        .collect::<Result<Vec<_>, ParseError>>()?;

    let known_genfs = read_all(&genfs_files)?
        .par_iter()
        .map(|(name, text)| parse_genfs_contexts(text, name))
        .collect::<Result<Vec<_>, ParseError>>()?;

    let contexts = load_contexts(&context_files)?;
    let known_contexts = load_contexts(&source_context_files)?;

    let mut known = resolver.resolve_all(platform.rules);
    known.extend(source_rules.into_iter().flatten());
    known.push(Rule::new(
        RuleType::Attribute,
        vec![RulePart::literal(CIL_GEN_REQUIRE)],
        Vec::<String>::new(),
    ));

    let policy_rules = resolver.resolve_all(policy.rules);
    let unresolved_types: Vec<String> = resolver.unresolved_names().map(str::to_string).collect();

    info!(
        "Loaded {} policy rules and {} known rules",
        policy_rules.len(),
        known.len()
    );

    Ok(LoadedInputs {
        policy: policy_rules,
        genfs: policy.genfs,
        known,
        known_genfs: known_genfs.into_iter().flatten().collect(),
        contexts,
        known_contexts,
        library,
        classmap,
        unresolved_types,
    })
}
