//! Handcrafted prompt templates.
//!
//! Templates are grouped by category (`independent`, `individuals`,
//! `persons`) plus a `general` group shared by all of them. Built-in defaults are compiled in; a
//! directory of Markdown files can override any of them.

use std::path::Path;
use tracing::debug;

use crate::error::{ExtractionError, Result};
use crate::types::pii::Category;
use crate::types::prompt::PromptKind;

// =============================================================================
// General templates
// =============================================================================

pub const FEEDBACK_PROMPT: &str = r#"You review system prompts written for language-model experts.

The prompt under review is given in <prompt> tags. Critique it for:
- Clarity: can the expert follow it without guessing?
- Completeness: does it define the task, the inputs and the exact output format?
- Precision: does it separate the requested information from similar information?
- Robustness: does it cover edge cases such as missing or ambiguous mentions?

Score every criterion as N/10 and give concrete suggestions for each score below 10."#;

pub const INCORPORATE_FEEDBACK_PROMPT: &str = r#"Rewrite the prompt so that it addresses every point of your feedback.
Keep the output format the prompt requires unchanged.
Answer with the improved prompt only, without commentary."#;

pub const NEXT_INSTRUCTION_TEMPLATE: &str = r#"The {{expert}} finished the step "{{previous_step}}".

<response>{{response}}</response>

Write the instructions for the expert that should take the next step."#;

pub const NEXT_STEP_TEMPLATE: &str = r#"Previous step: {{previous_step}}

<response>{{response}}</response>

Which step comes next?"#;

// =============================================================================
// Independent category
// =============================================================================

pub const META_EXPERT_INDEPENDENT: &str = r#"You are the meta-expert coordinating the extraction of personally identifiable information (PII) from documents.

You do not extract anything yourself. You design the experts that do:
- an extraction expert that finds every mention of the PII in a text
- a verification expert that checks one extracted mention at a time
- an issue-solving expert that corrects rejected mentions and finds missed ones

The PII is described in <pii> tags. Later messages report what the previous expert produced.

Answer with JSON only:
{"job description": "<the role of the next expert>", "instructions": ["<step>", "..."]}"#;

pub const META_EXPERT_NEXT_STEP_INDEPENDENT: &str = r#"You decide the next step of a PII extraction workflow.

Steps:
- extracting: extract the PII from the text again
- verification: verify the extracted mentions one by one
- issues_solving: correct the mentions rejected by the verification and look for missed ones
- end: the result is final

Verify new extractions before finishing. Solve issues only after a verification rejected something.

Answer with exactly one JSON object: {"Next": "<step>"}"#;

pub const EXTRACTING_GENERATION_INDEPENDENT: &str = r#"You write the system prompt for an extraction expert.

The input is JSON with the keys "job description", "instructions", "pii", "description of pii", "examples" and optionally "guidelines".

The prompt you write must:
- give the expert the role from "job description" and follow "instructions"
- explain what counts as the PII, using the description and the examples
- tell the expert that the user message contains <text>, <pii> and <pii_description> tags
- require every mention to be copied verbatim, with its surrounding context and a short reasoning
- require this exact output format, with an empty list when nothing is found:
  {"extracted_information": [{"identifier": "...", "context": "...", "reasoning": "..."}]}

Answer with the prompt only."#;

pub const VERIFYING_GENERATION_INDEPENDENT: &str = r#"You write the system prompt for a verification expert.

The input is JSON with the keys "job description", "instructions", "pii", "description of pii", "examples" and optionally "guidelines".

The prompt you write must:
- explain that the user message contains one proposed mention in <solution> tags, the source in <text> tags and the PII in <pii> tags
- tell the expert to accept the mention only if it is verbatim in the text and really is the PII
- require this exact output format, keyed by the id of the proposed mention:
  {"<id>": {"bool": true, "reasoning": "..."}}

Answer with the prompt only."#;

pub const ISSUE_GENERATION_INDEPENDENT: &str = r#"You write the system prompt for an issue-solving expert.

The input is JSON with the keys "job description", "instructions", "pii", "description of pii", "examples" and optionally "guidelines".

The prompt you write must:
- explain that the user message contains the source in <text> tags, accepted mentions in <correct_solution> tags and rejected mentions with the reason in <wrong_solution> tags
- tell the expert to correct rejected mentions where the text supports a correction, drop them otherwise, and add mentions that were missed
- forbid repeating accepted mentions
- require this exact output format:
  {"extracted_information": [{"identifier": "...", "context": "...", "reasoning": "..."}]}

Answer with the prompt only."#;

pub const EXTRACTING_EXAMPLES_INDEPENDENT: &str = r#"You write worked examples for an extraction prompt.

The prompt is given in <prompt> tags and example values of the PII in <example_list> tags.
For each example value, write a short text containing it and the exact answer the prompt requires.
Answer with the examples only."#;

pub const VERIFYING_EXAMPLES_INDEPENDENT: &str = r#"You write worked examples for a verification prompt.

The prompt is given in <prompt> tags and example values of the PII in <example_list> tags.
Write one accepted and one rejected verification for each example value, in the exact answer format the prompt requires.
Answer with the examples only."#;

pub const ISSUE_EXAMPLES_INDEPENDENT: &str = r#"<text>Contact: Jane Roe, born 12.05.1980, lives in Berlin.</text>
<correct_solution>{}</correct_solution>
<wrong_solution>{"a1b2c3d4e5f6a7b8": {"identifier": "12.05.198", "context": "born 12.05.198", "reason_why_false": "The date is cut off."}}</wrong_solution>

Answer:
{"extracted_information": [{"identifier": "12.05.1980", "context": "born 12.05.1980, lives in Berlin", "reasoning": "Corrected the truncated date of birth."}]}"#;

// =============================================================================
// Individuals category
// =============================================================================

pub const META_EXPERT_INDIVIDUALS: &str = r#"You are the meta-expert coordinating the extraction of personally identifiable information (PII) that belongs to specific persons.

You do not extract anything yourself. You design the experts that do:
- an extraction expert that finds every mention of the PII and assigns it to a known person
- a verification expert that checks one extracted mention and its person at a time
- an issue-solving expert that corrects rejected mentions and finds missed ones

The PII is described in <pii> tags. Later messages report what the previous expert produced.

Answer with JSON only:
{"job description": "<the role of the next expert>", "instructions": ["<step>", "..."]}"#;

pub const META_EXPERT_NEXT_STEP_INDIVIDUALS: &str = r#"You decide the next step of a person-centric PII extraction workflow.

Steps:
- extracting: extract the PII for every known person again
- verification: verify the extracted mentions and their persons one by one
- issues_solving: correct the mentions rejected by the verification and look for missed ones
- end: the result is final

Verify new extractions before finishing. Solve issues only after a verification rejected something.

Answer with exactly one JSON object: {"Next": "<step>"}"#;

pub const EXTRACTING_GENERATION_INDIVIDUALS: &str = r#"You write the system prompt for a person-centric extraction expert.

The input is JSON with the keys "job description", "instructions", "pii", "description of pii", "examples" and optionally "guidelines".

The prompt you write must:
- give the expert the role from "job description" and follow "instructions"
- explain that the user message contains the known persons in <person_dict> tags (id -> full name, abbreviations, alias), the source in <text> tags and the PII in <pii> and <pii_description> tags
- require every mention to be copied verbatim and assigned to the id of the person it belongs to
- require this exact output format, with an empty list for persons without mentions:
  {"<person id>": [{"identifier": "...", "context": "...", "reasoning": "..."}]}

Answer with the prompt only."#;

pub const VERIFYING_GENERATION_INDIVIDUALS: &str = r#"You write the system prompt for a person-centric verification expert.

The input is JSON with the keys "job description", "instructions", "pii", "description of pii", "examples" and optionally "guidelines".

The prompt you write must:
- explain that the user message contains the known persons in <persons> tags, one proposed mention in <solution> tags keyed by the person id, the source in <text> tags and the PII in <pii> tags
- tell the expert to accept the mention only if it is verbatim in the text, really is the PII and belongs to that person
- require this exact output format, keyed by the "uuid_of_solution" of the proposed mention:
  {"<uuid_of_solution>": {"bool": true, "reasoning": "..."}}

Answer with the prompt only."#;

pub const ISSUE_GENERATION_INDIVIDUALS: &str = r#"You write the system prompt for a person-centric issue-solving expert.

The input is JSON with the keys "job description", "instructions", "pii", "description of pii", "examples" and optionally "guidelines".

The prompt you write must:
- explain that the user message contains the known persons in <persons> tags, the source in <text> tags, accepted mentions in <correct_solution> tags and rejected mentions with the reason in <wrong_solution> tags
- tell the expert to correct rejected mentions where the text supports a correction, drop them otherwise, and add mentions that were missed
- forbid repeating accepted mentions
- require this exact output format:
  {"<person id>": [{"identifier": "...", "context": "...", "reasoning": "..."}]}

Answer with the prompt only."#;

pub const EXTRACTING_EXAMPLES_INDIVIDUALS: &str = r#"You write worked examples for a person-centric extraction prompt.

The prompt is given in <prompt> tags and example values of the PII in <example_list> tags.
For each example value, write a short text mentioning two persons and the exact answer the prompt requires.
Answer with the examples only."#;

pub const VERIFYING_EXAMPLES_INDIVIDUALS: &str = r#"You write worked examples for a person-centric verification prompt.

The prompt is given in <prompt> tags and example values of the PII in <example_list> tags.
Write one accepted verification and one verification rejected because the mention belongs to another person, in the exact answer format the prompt requires.
Answer with the examples only."#;

pub const ISSUE_EXAMPLES_INDIVIDUALS: &str = r#"<persons>{"p-1": {"full name": "Jane Roe", "abbreviations": ["J. R."], "alias": []}, "p-2": {"full name": "John Doe", "abbreviations": [], "alias": ["Johnny"]}}</persons>
<text>Jane Roe (born 12.05.1980) and her brother Johnny (born 03.03.1975).</text>
<correct_solution>{}</correct_solution>
<wrong_solution>{"a1b2c3d4e5f6a7b8": {"identifier": "03.03.1975", "context": "Johnny (born 03.03.1975)", "reason_why_false": "The date belongs to John Doe, not Jane Roe.", "uuid_person": "p-1"}}</wrong_solution>

Answer:
{"p-2": [{"identifier": "03.03.1975", "context": "her brother Johnny (born 03.03.1975)", "reasoning": "Johnny is the alias of John Doe."}], "p-1": [{"identifier": "12.05.1980", "context": "Jane Roe (born 12.05.1980)", "reasoning": "Missed date of birth of Jane Roe."}]}"#;

// =============================================================================
// Persons category
// =============================================================================

pub const META_EXPERT_PERSONS: &str = r#"You are the meta-expert coordinating the recognition of the natural persons mentioned in documents.

You do not recognize anyone yourself. You design the experts that do:
- a recognition expert that lists every person the text mentions, with abbreviations and aliases
- a verification expert that checks one recognized person at a time
- an issue-solving expert that corrects rejected persons and finds missed ones

The information to recognize is described in <pii> tags. Later messages report what the previous expert produced.

Answer with JSON only:
{"job description": "<the role of the next expert>", "instructions": ["<step>", "..."]}"#;

pub const META_EXPERT_NEXT_STEP_PERSONS: &str = r#"You decide the next step of a person recognition workflow.

Steps:
- extracting: recognize the persons in the text again
- verification: verify the recognized persons one by one
- issues_solving: correct the persons rejected by the verification and look for missed ones
- end: the result is final

Verify new recognitions before finishing. Solve issues only after a verification rejected something.

Answer with exactly one JSON object: {"Next": "<step>"}"#;

pub const EXTRACTING_GENERATION_PERSONS: &str = r#"You write the system prompt for a person recognition expert.

The input is JSON with the keys "job description", "instructions", "pii", "description of pii", "examples" and optionally "guidelines".

The prompt you write must:
- give the expert the role from "job description" and follow "instructions"
- explain that the user message contains the persons already known in <person_dict> tags and the source in <text> tags
- tell the expert to list only persons that are not already known, one entry per person, with the full name as written and every abbreviation and alias the text uses for that person
- require this exact output format, with an empty list when nobody new is mentioned:
  {"Persons": [{"full name": "...", "abbreviations": ["..."], "aliases": ["..."]}]}

Answer with the prompt only."#;

pub const VERIFYING_GENERATION_PERSONS: &str = r#"You write the system prompt for a person verification expert.

The input is JSON with the keys "job description", "instructions", "pii", "description of pii", "examples" and optionally "guidelines".

The prompt you write must:
- explain that the user message contains one recognized person in <solution> tags, keyed by its id, and the source in <text> tags
- tell the expert to accept the person only if the text mentions a natural person by that name and every abbreviation and alias really refers to them
- require this exact output format, keyed by the id of the recognized person:
  {"<id>": {"bool": true, "reasoning": "..."}}

Answer with the prompt only."#;

pub const ISSUE_GENERATION_PERSONS: &str = r#"You write the system prompt for a person recognition issue-solving expert.

The input is JSON with the keys "job description", "instructions", "pii", "description of pii", "examples" and optionally "guidelines".

The prompt you write must:
- explain that the user message contains the source in <text> tags, accepted persons in <correct_solution> tags and rejected persons with the reason in <wrong_solution> tags
- tell the expert to correct rejected persons where the text supports a correction, drop them otherwise, and add persons that were missed
- forbid repeating accepted persons
- require this exact output format:
  {"Persons": [{"full name": "...", "abbreviations": ["..."], "aliases": ["..."]}]}

Answer with the prompt only."#;

pub const EXTRACTING_EXAMPLES_PERSONS: &str = r#"You write worked examples for a person recognition prompt.

The prompt is given in <prompt> tags and example persons in <example_list> tags.
For each example, write a short text mentioning the person by full name and by an abbreviation or alias, and the exact answer the prompt requires.
Answer with the examples only."#;

pub const VERIFYING_EXAMPLES_PERSONS: &str = r#"You write worked examples for a person verification prompt.

The prompt is given in <prompt> tags and example persons in <example_list> tags.
Write one accepted verification and one verification rejected because an alias belongs to someone else, in the exact answer format the prompt requires.
Answer with the examples only."#;

pub const ISSUE_EXAMPLES_PERSONS: &str = r#"<text>Jane Roe met her brother John Doe ("Johnny") in Berlin. J. R. paid the bill.</text>
<correct_solution>{"a1b2c3d4e5f6a7b8": {"full name": "John Doe", "abbreviations": [], "aliases": ["Johnny"]}}</correct_solution>
<wrong_solution>{"b2c3d4e5f6a7b8c9": {"full name": "Berlin", "abbreviations": [], "aliases": [], "reason_why_false": "Berlin is a city, not a person."}}</wrong_solution>

Answer:
{"Persons": [{"full name": "Jane Roe", "abbreviations": ["J. R."], "aliases": []}]}"#;

pub const CONDENSE_PERSONS_PROMPT: &str = r#"You clean up a directory of persons recognized in one document.

The directory is given in <person_dict> tags as JSON: id -> {"full name", "abbreviations", "alias"}.
Several entries may describe the same person, for example because a later part of the document used a different spelling, an abbreviation or a nickname.

Merge every group of entries that describe the same person into one entry:
- keep the id of one of the merged entries
- keep the most complete full name
- combine their abbreviations and aliases without duplicates
Keep entries that describe different persons unchanged.

Answer with JSON only:
{"<id>": {"full name": "...", "abbreviations": ["..."], "aliases": ["..."]}}"#;

/// Marker some models put in front of generated examples.
pub const EXAMPLE_MARKER: &str = "**Example Generation for the entries**: ";

/// Templates specific to one category.
#[derive(Debug, Clone)]
pub struct CategoryTemplates {
    pub meta_expert: String,
    pub meta_expert_next_step: String,
    pub extracting_generation: String,
    pub verifying_generation: String,
    pub issue_generation: String,
    pub extracting_examples: String,
    pub verifying_examples: String,
    /// Handcrafted, appended verbatim to issue prompts
    pub issue_examples: String,
}

impl CategoryTemplates {
    fn independent() -> Self {
        Self {
            meta_expert: META_EXPERT_INDEPENDENT.into(),
            meta_expert_next_step: META_EXPERT_NEXT_STEP_INDEPENDENT.into(),
            extracting_generation: EXTRACTING_GENERATION_INDEPENDENT.into(),
            verifying_generation: VERIFYING_GENERATION_INDEPENDENT.into(),
            issue_generation: ISSUE_GENERATION_INDEPENDENT.into(),
            extracting_examples: EXTRACTING_EXAMPLES_INDEPENDENT.into(),
            verifying_examples: VERIFYING_EXAMPLES_INDEPENDENT.into(),
            issue_examples: ISSUE_EXAMPLES_INDEPENDENT.into(),
        }
    }

    fn persons() -> Self {
        Self {
            meta_expert: META_EXPERT_PERSONS.into(),
            meta_expert_next_step: META_EXPERT_NEXT_STEP_PERSONS.into(),
            extracting_generation: EXTRACTING_GENERATION_PERSONS.into(),
            verifying_generation: VERIFYING_GENERATION_PERSONS.into(),
            issue_generation: ISSUE_GENERATION_PERSONS.into(),
            extracting_examples: EXTRACTING_EXAMPLES_PERSONS.into(),
            verifying_examples: VERIFYING_EXAMPLES_PERSONS.into(),
            issue_examples: ISSUE_EXAMPLES_PERSONS.into(),
        }
    }

    fn individuals() -> Self {
        Self {
            meta_expert: META_EXPERT_INDIVIDUALS.into(),
            meta_expert_next_step: META_EXPERT_NEXT_STEP_INDIVIDUALS.into(),
            extracting_generation: EXTRACTING_GENERATION_INDIVIDUALS.into(),
            verifying_generation: VERIFYING_GENERATION_INDIVIDUALS.into(),
            issue_generation: ISSUE_GENERATION_INDIVIDUALS.into(),
            extracting_examples: EXTRACTING_EXAMPLES_INDIVIDUALS.into(),
            verifying_examples: VERIFYING_EXAMPLES_INDIVIDUALS.into(),
            issue_examples: ISSUE_EXAMPLES_INDIVIDUALS.into(),
        }
    }

    /// Override file names, as found under `<dir>/<category>/<name>.md`.
    fn slots(&mut self) -> [(&'static str, &mut String); 8] {
        [
            ("meta_expert_prompt", &mut self.meta_expert),
            ("meta_expert_next_step_prompt", &mut self.meta_expert_next_step),
            ("prompt_generation", &mut self.extracting_generation),
            ("prompt_verifying_generation", &mut self.verifying_generation),
            ("prompt_issue_solving", &mut self.issue_generation),
            ("prompt_example_generation", &mut self.extracting_examples),
            ("prompt_example_verifying_generation", &mut self.verifying_examples),
            ("examples_issue", &mut self.issue_examples),
        ]
    }
}

/// Templates shared by every category.
#[derive(Debug, Clone)]
pub struct GeneralTemplates {
    pub feedback: String,
    pub incorporate_feedback: String,
    /// Placeholders: `{{expert}}`, `{{previous_step}}`, `{{response}}`
    pub next_instruction: String,
    /// Placeholders: `{{previous_step}}`, `{{response}}`
    pub next_step: String,
    /// Merges duplicate persons of a document
    pub condense_persons: String,
}

impl Default for GeneralTemplates {
    fn default() -> Self {
        Self {
            feedback: FEEDBACK_PROMPT.into(),
            incorporate_feedback: INCORPORATE_FEEDBACK_PROMPT.into(),
            next_instruction: NEXT_INSTRUCTION_TEMPLATE.into(),
            next_step: NEXT_STEP_TEMPLATE.into(),
            condense_persons: CONDENSE_PERSONS_PROMPT.into(),
        }
    }
}

impl GeneralTemplates {
    fn slots(&mut self) -> [(&'static str, &mut String); 5] {
        [
            ("prompt_feedback_generation", &mut self.feedback),
            ("prompt_incorporate_feedback", &mut self.incorporate_feedback),
            ("next_instruction_meta", &mut self.next_instruction),
            ("next_step_meta", &mut self.next_step),
            ("condense_persons", &mut self.condense_persons),
        ]
    }
}

/// Every template the orchestrator uses.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    pub independent: CategoryTemplates,
    pub individuals: CategoryTemplates,
    pub persons: CategoryTemplates,
    pub general: GeneralTemplates,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptLibrary {
    /// The compiled-in templates.
    pub fn builtin() -> Self {
        Self {
            independent: CategoryTemplates::independent(),
            individuals: CategoryTemplates::individuals(),
            persons: CategoryTemplates::persons(),
            general: GeneralTemplates::default(),
        }
    }

    /// Replace templates with `<dir>/<category>/<name>.md` files where present.
    ///
    /// `<category>` is `independent`, `individuals`, `persons` or `general`.
    /// Missing files keep the current template.
    pub fn load_overrides(mut self, dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        for (group, slots) in [
            ("independent", self.independent.slots().into_iter().collect::<Vec<_>>()),
            ("individuals", self.individuals.slots().into_iter().collect()),
            ("persons", self.persons.slots().into_iter().collect()),
            ("general", self.general.slots().into_iter().collect()),
        ] {
            for (name, slot) in slots {
                let path = dir.join(group).join(format!("{name}.md"));
                match std::fs::read_to_string(&path) {
                    Ok(text) => {
                        debug!(path = %path.display(), "Template override loaded");
                        *slot = text;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(ExtractionError::Config(format!(
                            "cannot read template {}: {e}",
                            path.display()
                        )))
                    }
                }
            }
        }
        Ok(self)
    }

    pub fn category(&self, category: Category) -> &CategoryTemplates {
        match category {
            Category::Independent => &self.independent,
            Category::Individuals => &self.individuals,
            Category::Persons => &self.persons,
        }
    }

    /// System prompt that asks the prompt creator for a draft.
    pub fn generation(&self, category: Category, kind: PromptKind) -> &str {
        let t = self.category(category);
        match kind {
            PromptKind::Extracting => &t.extracting_generation,
            PromptKind::Verifying => &t.verifying_generation,
            PromptKind::Issue => &t.issue_generation,
        }
    }

    /// System prompt for model-generated examples; `None` where examples
    /// are handcrafted.
    pub fn example_generation(&self, category: Category, kind: PromptKind) -> Option<&str> {
        let t = self.category(category);
        match kind {
            PromptKind::Extracting => Some(&t.extracting_examples),
            PromptKind::Verifying => Some(&t.verifying_examples),
            PromptKind::Issue => None,
        }
    }

    pub fn render_next_instruction(&self, expert: &str, previous_step: &str, response: &str) -> String {
        self.general
            .next_instruction
            .replace("{{expert}}", expert)
            .replace("{{previous_step}}", previous_step)
            .replace("{{response}}", response)
    }

    pub fn render_next_step(&self, previous_step: &str, response: &str) -> String {
        self.general
            .next_step
            .replace("{{previous_step}}", previous_step)
            .replace("{{response}}", response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_templates_carry_protocols() {
        let library = PromptLibrary::builtin();
        for category in [Category::Independent, Category::Individuals, Category::Persons] {
            let t = library.category(category);
            assert!(t.meta_expert.contains("job description"));
            assert!(t.meta_expert_next_step.contains(r#"{"Next": "<step>"}"#));
            assert!(library.example_generation(category, PromptKind::Issue).is_none());
        }
        assert!(library
            .generation(Category::Individuals, PromptKind::Verifying)
            .contains("uuid_of_solution"));
        assert!(library
            .generation(Category::Persons, PromptKind::Extracting)
            .contains(r#"{"Persons": ["#));
        assert!(library.general.condense_persons.contains("<person_dict>"));
    }

    #[test]
    fn test_render_placeholders() {
        let library = PromptLibrary::builtin();
        let text = library.render_next_instruction("Date expert", "extracting", "[]");
        assert!(text.contains("The Date expert finished"));
        assert!(text.contains("<response>[]</response>"));
        assert!(!text.contains("{{"));

        let text = library.render_next_step("verification", "{}");
        assert!(text.contains("Previous step: verification"));
    }

    #[test]
    fn test_load_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("individuals")).unwrap();
        std::fs::create_dir_all(dir.path().join("general")).unwrap();
        std::fs::write(
            dir.path().join("individuals/meta_expert_prompt.md"),
            "custom meta expert",
        )
        .unwrap();
        std::fs::write(dir.path().join("general/next_step_meta.md"), "custom next").unwrap();

        let library = PromptLibrary::builtin().load_overrides(dir.path()).unwrap();
        assert_eq!(library.individuals.meta_expert, "custom meta expert");
        assert_eq!(library.independent.meta_expert, META_EXPERT_INDEPENDENT);
        assert_eq!(library.general.next_step, "custom next");
        assert_eq!(library.general.feedback, FEEDBACK_PROMPT);
    }
}
