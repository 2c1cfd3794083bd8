//! Splits a parsed file into content-addressed chunks.
//!
//! Code files are split at declaration boundaries discovered by
//! `inspector::extract_symbols_from_source` (tree-sitter, same drivers the
//! teacher's AST-aware indexer uses); markdown files split on heading
//! hierarchy instead. Both variants enforce the token budget by walking
//! backward to the nearest blank line, falling back to a hard split.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::chunk::{approx_token_count, Chunk, ChunkMetadata, ChunkType};
use crate::error::CoreResult;
use crate::inspector;

/// A single top-level declaration discovered in a source file, with its
/// 1-based starting line. Declarations are assumed sorted ascending by
/// `start_line` (the inspector guarantees this).
#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: String,
    pub start_line: usize,
}

/// A file ready to be chunked: content plus its declaration boundaries.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub file_path: String,
    pub language: String,
    pub content: String,
    pub declarations: Vec<Declaration>,
}

fn is_markdown(language: &str, file_path: &str) -> bool {
    language.eq_ignore_ascii_case("markdown") || file_path.to_ascii_lowercase().ends_with(".md")
}

impl ParsedFile {
    /// Builds a `ParsedFile` by running the tree-sitter symbol extractor
    /// over `content`. Markdown files get no declarations here — the
    /// markdown variant derives structure from headings instead.
    pub fn discover(file_path: impl Into<String>, language: impl Into<String>, content: impl Into<String>) -> Self {
        let file_path = file_path.into();
        let language = language.into();
        let content = content.into();

        let declarations = if is_markdown(&language, &file_path) {
            Vec::new()
        } else {
            inspector::extract_symbols_from_source(Path::new(&file_path), &content)
                .into_iter()
                .map(|s| Declaration { name: s.name, start_line: s.line as usize + 1 })
                .collect()
        };

        Self { file_path, language, content, declarations }
    }
}

/// Chunks a parsed file per its language variant. Empty or whitespace-only
/// content yields no chunks.
pub fn chunk_file(parsed: &ParsedFile, max_tokens: usize) -> CoreResult<Vec<Chunk>> {
    if parsed.content.trim().is_empty() {
        return Ok(Vec::new());
    }
    if is_markdown(&parsed.language, &parsed.file_path) {
        markdown::chunk_markdown(parsed, max_tokens)
    } else {
        chunk_code(parsed, max_tokens)
    }
}

// ---------------------------------------------------------------------------
// Code variant
// ---------------------------------------------------------------------------

fn chunk_code(parsed: &ParsedFile, max_tokens: usize) -> CoreResult<Vec<Chunk>> {
    let lines: Vec<&str> = parsed.content.lines().collect();
    let total_lines = lines.len();
    if total_lines == 0 {
        return Ok(Vec::new());
    }

    if parsed.declarations.is_empty() {
        let metadata = ChunkMetadata { chunk_type: ChunkType::Module, name: "(module)".to_string(), ..Default::default() };
        return Ok(vec![build_chunk(parsed, 1, total_lines, &lines, metadata)]);
    }

    let mut chunks = Vec::new();

    // Preamble: everything before the first declaration.
    let first_start = parsed.declarations[0].start_line;
    if first_start > 1 {
        let preamble_lines = &lines[0..first_start - 1];
        let chunk_type = if is_import_heavy(preamble_lines) { ChunkType::ImportBlock } else { ChunkType::Module };
        let metadata = ChunkMetadata { chunk_type, name: "(preamble)".to_string(), ..default_imports_exports(preamble_lines) };
        chunks.extend(split_and_build(parsed, &lines, 1, first_start - 1, "(preamble)", metadata, max_tokens));
    }

    for (i, decl) in parsed.declarations.iter().enumerate() {
        let region_start = decl.start_line;
        let region_end = parsed
            .declarations
            .get(i + 1)
            .map(|next| next.start_line.saturating_sub(1))
            .unwrap_or(total_lines)
            .max(region_start);

        if region_start > total_lines {
            continue;
        }
        let region_end = region_end.min(total_lines);
        let region_lines = &lines[region_start - 1..region_end];
        let first_line = lines.get(region_start - 1).copied().unwrap_or("");
        let chunk_type = classify_declaration(first_line);
        let base = ChunkMetadata { chunk_type, name: decl.name.clone(), declarations: vec![decl.name.clone()], ..default_imports_exports(region_lines) };

        chunks.extend(split_and_build(parsed, &lines, region_start, region_end, &decl.name, base, max_tokens));
    }

    Ok(chunks)
}

fn default_imports_exports(lines: &[&str]) -> ChunkMetadata {
    let text = lines.join("\n");
    ChunkMetadata { imports: extract_imports(&text), exports: extract_exports(&text), ..Default::default() }
}

/// Splits `[start_line, end_line]` (1-based, inclusive) into one or more
/// chunks honoring the token budget, naming sub-chunks `base_name#n` when a
/// split occurs.
fn split_and_build(
    parsed: &ParsedFile,
    lines: &[&str],
    start_line: usize,
    end_line: usize,
    base_name: &str,
    base_metadata: ChunkMetadata,
    max_tokens: usize,
) -> Vec<Chunk> {
    if start_line > end_line {
        return Vec::new();
    }
    let region = &lines[start_line - 1..end_line];
    let region_text = region.join("\n");

    if approx_token_count(&region_text) <= max_tokens {
        return vec![build_chunk(parsed, start_line, end_line, lines, base_metadata)];
    }

    let ranges = split_region_by_budget(region, max_tokens);
    ranges
        .into_iter()
        .enumerate()
        .map(|(i, (rel_start, rel_end))| {
            let abs_start = start_line + rel_start;
            let abs_end = start_line + rel_end;
            let mut metadata = base_metadata.clone();
            metadata.name = format!("{}#{}", base_name, i + 1);
            build_chunk(parsed, abs_start, abs_end, lines, metadata)
        })
        .collect()
}

fn build_chunk(parsed: &ParsedFile, start_line: usize, end_line: usize, lines: &[&str], metadata: ChunkMetadata) -> Chunk {
    let text = lines[start_line - 1..end_line.min(lines.len())].join("\n");
    Chunk::new(parsed.file_path.clone(), start_line, end_line, text, parsed.language.clone(), metadata)
}

/// Splits `region` into 0-based-relative `(start, end)` inclusive index
/// ranges such that each piece's approximate token count stays within
/// `max_tokens`, preferring to break at the nearest preceding blank line.
fn split_region_by_budget(region: &[&str], max_tokens: usize) -> Vec<(usize, usize)> {
    let max_bytes = max_tokens.saturating_mul(4).max(1);
    let mut ranges = Vec::new();
    let mut cursor = 0usize;

    while cursor < region.len() {
        let mut acc = 0usize;
        let mut end = cursor;
        let mut last_blank: Option<usize> = None;
        let mut i = cursor;
        let mut overflowed = false;

        while i < region.len() {
            let line_len = region[i].len() + 1;
            if acc + line_len > max_bytes && i > cursor {
                overflowed = true;
                break;
            }
            acc += line_len;
            if region[i].trim().is_empty() {
                last_blank = Some(i);
            }
            end = i;
            i += 1;
        }

        if overflowed {
            if let Some(blank) = last_blank {
                if blank > cursor {
                    end = blank;
                }
            }
            // else: no blank line to break on — hard split at `end`, the
            // last line that fit inside the budget.
        }

        ranges.push((cursor, end));
        cursor = end + 1;
    }

    if ranges.is_empty() {
        ranges.push((0, region.len().saturating_sub(1)));
    }
    ranges
}

fn regex_cache(pattern: &'static str, cell: &'static OnceLock<Regex>) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex is valid"))
}

fn re_type_alias() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex_cache(r"^(?:pub\s+|export\s+)?type\s+[A-Za-z_][A-Za-z0-9_]*.*=", &CELL)
}

fn re_function() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex_cache(r"\b(fn|function|def|func)\s+[A-Za-z_][A-Za-z0-9_]*", &CELL)
}

fn re_arrow_binding() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex_cache(r"=\s*(async\s*)?\([^)]*\)\s*(:[^=>]+)?=>", &CELL)
}

fn re_import_line() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex_cache(
        r"^\s*(import\b|from\s+\S+\s+import\b|use\s+\S+|require\(|#include\b|package\s+\S+\s*$)",
        &CELL,
    )
}

/// Classifies a declaration's `chunk_type` from a lightweight textual
/// inspection of its first source line. Indented declarations (a nesting
/// signal, since top-level declarations start at column 0) are treated as
/// methods rather than free functions.
fn classify_declaration(first_line: &str) -> ChunkType {
    let trimmed = first_line.trim_start();
    let indented = first_line.len() != trimmed.len();
    let lower = trimmed.to_ascii_lowercase();

    if lower.starts_with("interface ") || lower.contains(" interface ") {
        return ChunkType::Interface;
    }
    if re_type_alias().is_match(trimmed) {
        return ChunkType::TypeAlias;
    }
    if lower.starts_with("class ") || lower.contains(" class ") {
        return ChunkType::Class;
    }
    if re_function().is_match(trimmed) || re_arrow_binding().is_match(trimmed) {
        return if indented { ChunkType::Method } else { ChunkType::Function };
    }
    ChunkType::Other
}

fn is_import_heavy(lines: &[&str]) -> bool {
    let non_blank: Vec<&&str> = lines.iter().filter(|l| !l.trim().is_empty()).collect();
    if non_blank.is_empty() {
        return false;
    }
    let import_count = non_blank.iter().filter(|l| re_import_line().is_match(l)).count();
    import_count * 2 > non_blank.len()
}

fn extract_imports(text: &str) -> Vec<String> {
    static BRACE: OnceLock<Regex> = OnceLock::new();
    static FROM: OnceLock<Regex> = OnceLock::new();
    static USE: OnceLock<Regex> = OnceLock::new();
    static REQUIRE: OnceLock<Regex> = OnceLock::new();

    let brace_re = regex_cache(r"import\s*\{([^}]+)\}", &BRACE);
    let from_re = regex_cache(r"^from\s+\S+\s+import\s+(.+)$", &FROM);
    let use_re = regex_cache(r"^use\s+([A-Za-z0-9_:\{\}, ]+);?", &USE);
    let require_re = regex_cache(r#"require\(['"]([^'"]+)['"]\)"#, &REQUIRE);

    let mut out = Vec::new();
    for line in text.lines() {
        let t = line.trim();
        if let Some(caps) = brace_re.captures(t) {
            out.extend(split_names(&caps[1]));
        } else if let Some(caps) = from_re.captures(t) {
            out.extend(split_names(&caps[1]));
        } else if let Some(caps) = use_re.captures(t) {
            out.extend(split_use_path(&caps[1]));
        } else if let Some(caps) = require_re.captures(t) {
            out.push(caps[1].to_string());
        }
    }
    dedup_stable(out)
}

fn extract_exports(text: &str) -> Vec<String> {
    static EXPORT_NAMED: OnceLock<Regex> = OnceLock::new();
    static PUB_ITEM: OnceLock<Regex> = OnceLock::new();
    static MODULE_EXPORTS: OnceLock<Regex> = OnceLock::new();

    let export_re = regex_cache(r"^export\s+(?:default\s+)?(?:async\s+)?(?:function|class|const|let|var|interface|type)\s+([A-Za-z_][A-Za-z0-9_]*)", &EXPORT_NAMED);
    let pub_re = regex_cache(r"^pub\s+(?:async\s+)?(?:fn|struct|enum|trait|const|type)\s+([A-Za-z_][A-Za-z0-9_]*)", &PUB_ITEM);
    let module_exports_re = regex_cache(r"^module\.exports\.([A-Za-z_][A-Za-z0-9_]*)\s*=", &MODULE_EXPORTS);

    let mut out = Vec::new();
    for line in text.lines() {
        let t = line.trim();
        if let Some(caps) = export_re.captures(t) {
            out.push(caps[1].to_string());
        } else if let Some(caps) = pub_re.captures(t) {
            out.push(caps[1].to_string());
        } else if let Some(caps) = module_exports_re.captures(t) {
            out.push(caps[1].to_string());
        }
    }
    dedup_stable(out)
}

fn split_names(group: &str) -> Vec<String> {
    group
        .split(',')
        .map(|s| s.trim().trim_start_matches('*').trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_use_path(path: &str) -> Vec<String> {
    let path = path.trim().trim_end_matches(';');
    if let Some(idx) = path.rfind("::{") {
        let inner = &path[idx + 3..path.len().saturating_sub(1).max(idx + 3)];
        let inner = inner.trim_end_matches('}');
        return split_names(inner);
    }
    match path.rsplit("::").next() {
        Some(last) if !last.is_empty() => vec![last.to_string()],
        _ => Vec::new(),
    }
}

fn dedup_stable(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.into_iter().filter(|s| seen.insert(s.clone())).collect()
}

mod markdown {
    use super::*;

    #[derive(Default)]
    struct Frontmatter {
        title: Option<String>,
        tags: Vec<String>,
        aliases: Vec<String>,
    }

    /// Parses a `---`-delimited frontmatter block at the very top of the
    /// file. Returns the parsed frontmatter and the 1-based line the body
    /// starts on.
    fn parse_frontmatter(lines: &[&str]) -> (Frontmatter, usize) {
        if lines.first().map(|l| l.trim()) != Some("---") {
            return (Frontmatter::default(), 1);
        }
        let mut end_idx = None;
        for (i, line) in lines.iter().enumerate().skip(1) {
            if line.trim() == "---" {
                end_idx = Some(i);
                break;
            }
        }
        let Some(end_idx) = end_idx else {
            return (Frontmatter::default(), 1);
        };

        let mut fm = Frontmatter::default();
        for line in &lines[1..end_idx] {
            let Some((key, value)) = line.split_once(':') else { continue };
            let key = key.trim();
            let value = value.trim();
            match key {
                "title" => fm.title = Some(strip_quotes(value).to_string()),
                "tags" => fm.tags = parse_inline_list(value),
                "aliases" => fm.aliases = parse_inline_list(value),
                _ => {}
            }
        }
        (fm, end_idx + 2)
    }

    fn strip_quotes(s: &str) -> &str {
        s.trim_matches('"').trim_matches('\'')
    }

    fn parse_inline_list(value: &str) -> Vec<String> {
        let value = value.trim();
        if let Some(inner) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
            return inner.split(',').map(|s| strip_quotes(s.trim()).to_string()).filter(|s| !s.is_empty()).collect();
        }
        if value.is_empty() {
            return Vec::new();
        }
        vec![strip_quotes(value).to_string()]
    }

    struct Section {
        heading: Option<String>,
        start_line: usize,
        end_line: usize,
    }

    /// Splits the body into sections at heading boundaries, ignoring `#`
    /// characters that appear inside fenced code blocks.
    fn split_by_headings(lines: &[&str], body_start: usize, total_lines: usize) -> Vec<Section> {
        static HEADING: OnceLock<Regex> = OnceLock::new();
        let heading_re = regex_cache(r"^(#{1,6})\s+(.+)$", &HEADING);

        if body_start > total_lines {
            return Vec::new();
        }

        let mut sections = Vec::new();
        let mut in_fence = false;
        let mut current_heading: Option<String> = None;
        let mut current_start = body_start;

        for line_no in body_start..=total_lines {
            let line = lines[line_no - 1];
            let trimmed = line.trim_start();
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                in_fence = !in_fence;
                continue;
            }
            if !in_fence {
                if let Some(caps) = heading_re.captures(line) {
                    if line_no > current_start {
                        sections.push(Section { heading: current_heading.take(), start_line: current_start, end_line: line_no - 1 });
                    }
                    current_heading = Some(caps[2].trim().to_string());
                    current_start = line_no;
                }
            }
        }
        sections.push(Section { heading: current_heading, start_line: current_start, end_line: total_lines });
        sections.into_iter().filter(|s| s.start_line <= s.end_line).collect()
    }

    fn extract_links_and_tags(text: &str) -> (Vec<String>, Vec<String>) {
        static WIKILINK: OnceLock<Regex> = OnceLock::new();
        static HASHTAG: OnceLock<Regex> = OnceLock::new();

        let wikilink_re = regex_cache(r"\[\[([^\]|]+)(?:\|[^\]]+)?\]\]", &WIKILINK);
        let hashtag_re = regex_cache(r"(?:^|\s)#([A-Za-z][A-Za-z0-9_-]*)", &HASHTAG);

        let mut links = Vec::new();
        let mut tags = Vec::new();
        let mut in_fence = false;
        for line in text.lines() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                in_fence = !in_fence;
                continue;
            }
            if in_fence {
                continue;
            }
            for caps in wikilink_re.captures_iter(line) {
                links.push(caps[1].trim().to_string());
            }
            if !line.trim_start().starts_with('#') {
                for caps in hashtag_re.captures_iter(line) {
                    tags.push(caps[1].to_string());
                }
            }
        }
        (dedup_stable(links), dedup_stable(tags))
    }

    pub(super) fn chunk_markdown(parsed: &ParsedFile, max_tokens: usize) -> CoreResult<Vec<Chunk>> {
        let lines: Vec<&str> = parsed.content.lines().collect();
        let total_lines = lines.len();
        if total_lines == 0 {
            return Ok(Vec::new());
        }

        let (frontmatter, body_start) = parse_frontmatter(&lines);
        let sections = split_by_headings(&lines, body_start, total_lines);

        let mut chunks = Vec::new();
        for section in sections {
            let section_lines = &lines[section.start_line - 1..section.end_line];
            let section_text = section_lines.join("\n");
            if section_text.trim().is_empty() {
                continue;
            }
            let (links, tags) = extract_links_and_tags(&section_text);
            let mut all_tags = frontmatter.tags.clone();
            all_tags.extend(tags);
            let all_tags = dedup_stable(all_tags);

            let name = section.heading.clone().unwrap_or_else(|| "(doc)".to_string());
            let base_metadata = ChunkMetadata {
                chunk_type: ChunkType::Doc,
                name: name.clone(),
                links,
                tags: all_tags,
                aliases: frontmatter.aliases.clone(),
                doc_title: frontmatter.title.clone(),
                ..Default::default()
            };

            if approx_token_count(&section_text) <= max_tokens {
                chunks.push(build_chunk(parsed, section.start_line, section.end_line, &lines, base_metadata));
                continue;
            }

            let ranges = split_region_by_budget(section_lines, max_tokens);
            for (i, (rel_start, rel_end)) in ranges.into_iter().enumerate() {
                let abs_start = section.start_line + rel_start;
                let abs_end = section.start_line + rel_end;
                let mut metadata = base_metadata.clone();
                metadata.name = format!("{}#{}", name, i + 1);
                chunks.push(build_chunk(parsed, abs_start, abs_end, &lines, metadata));
            }
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(content: &str) -> ParsedFile {
        ParsedFile { file_path: "src/lib.rs".to_string(), language: "rust".to_string(), content: content.to_string(), declarations: Vec::new() }
    }

    #[test]
    fn empty_content_yields_no_chunks() {
        let p = parsed("   \n\t\n");
        let chunks = chunk_file(&p, 512).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn no_declarations_yields_single_module_chunk() {
        let p = parsed("let x = 1;\nlet y = 2;\n");
        let chunks = chunk_file(&p, 512).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.name, "(module)");
        assert!(matches!(chunks[0].metadata.chunk_type, ChunkType::Module));
    }

    #[test]
    fn declarations_split_with_preamble() {
        let content = "use std::fmt;\n\nfn one() {\n    1\n}\n\nfn two() {\n    2\n}\n";
        let mut p = parsed(content);
        p.declarations = vec![
            Declaration { name: "one".to_string(), start_line: 3 },
            Declaration { name: "two".to_string(), start_line: 7 },
        ];
        let chunks = chunk_file(&p, 512).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].metadata.name, "(preamble)");
        assert!(matches!(chunks[0].metadata.chunk_type, ChunkType::ImportBlock));
        assert_eq!(chunks[1].metadata.name, "one");
        assert!(matches!(chunks[1].metadata.chunk_type, ChunkType::Function));
        assert_eq!(chunks[2].metadata.name, "two");
    }

    #[test]
    fn oversized_declaration_splits_at_blank_line() {
        let mut body = String::new();
        body.push_str("fn big() {\n");
        for i in 0..40 {
            body.push_str(&format!("    let v{} = {};\n", i, i));
            if i == 10 {
                body.push('\n');
            }
        }
        body.push_str("}\n");
        let mut p = parsed(&body);
        p.declarations = vec![Declaration { name: "big".to_string(), start_line: 1 }];
        let chunks = chunk_file(&p, 20).unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].metadata.name, "big#1");
        assert_eq!(chunks[1].metadata.name, "big#2");
    }

    #[test]
    fn markdown_splits_on_headings_and_extracts_frontmatter() {
        let content = "---\ntitle: Notes\ntags: [a, b]\n---\n\n# Intro\n\nSee [[other-doc]] and #extra.\n\n# Details\n\nMore text.\n";
        let p = ParsedFile::discover("docs/notes.md", "markdown", content);
        let chunks = chunk_file(&p, 512).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(matches!(chunks[0].metadata.chunk_type, ChunkType::Doc));
        assert_eq!(chunks[0].metadata.doc_title.as_deref(), Some("Notes"));
        assert_eq!(chunks[0].metadata.tags, vec!["a".to_string(), "b".to_string(), "extra".to_string()]);
        assert_eq!(chunks[0].metadata.links, vec!["other-doc".to_string()]);
        assert_eq!(chunks[1].metadata.name, "Details");
    }

    #[test]
    fn classify_declaration_textual_cues() {
        assert!(matches!(classify_declaration("interface Foo {"), ChunkType::Interface));
        assert!(matches!(classify_declaration("type Foo = Bar;"), ChunkType::TypeAlias));
        assert!(matches!(classify_declaration("class Foo {"), ChunkType::Class));
        assert!(matches!(classify_declaration("pub fn foo() {"), ChunkType::Function));
        assert!(matches!(classify_declaration("    fn foo(&self) {"), ChunkType::Method));
        assert!(matches!(classify_declaration("const foo = (x) => {"), ChunkType::Function));
    }
}
