//! Integration tests for full extraction conversations.
//!
//! These tests drive the controller end to end against a scripted model:
//! 1. Meta-expert instructions and prompt authoring
//! 2. Extraction, verification and issue solving
//! 3. Model-driven phase transitions
//! 4. Persistence through the document driver

use std::sync::Arc;

use pii_extraction::{
    testing::ScriptedLlm, Category, Document, DocumentExtractor, ExtractionConfig,
    IndependentStrategy, MemoryStore, Orchestrator, PersonCentricStrategy, Person,
    PersonDirectory, Phase, PiiType, PromptKind, PromptLibrary, PromptOrigin,
};
use tempfile::TempDir;

const INSTRUCTIONS: &str = r#"```json
{"job description": "Date of birth expert", "instructions": ["Find every date of birth", "Quote the sentence it appears in"]}
```"#;

fn dob() -> PiiType {
    PiiType::new("date_of_birth", "The date a person was born").with_example("12.05.1980")
}

fn config(cache: &TempDir) -> ExtractionConfig {
    ExtractionConfig::default().with_cache_root(cache.path())
}

/// Expert model with meta-expert, authoring and phase replies for one category.
fn expert_for(library: &PromptLibrary, category: Category, next_steps: &[&str]) -> ScriptedLlm {
    let t = library.category(category);
    ScriptedLlm::new()
        .with_reply(t.meta_expert.clone(), INSTRUCTIONS)
        .with_replies(t.meta_expert_next_step.clone(), next_steps.iter().copied())
        .with_reply(t.extracting_generation.clone(), "EXTRACT DATES")
        .with_reply(t.extracting_examples.clone(), "Text: born 12.05.1980")
        .with_reply(t.verifying_generation.clone(), "VERIFY DATES")
        .with_reply(t.verifying_examples.clone(), "Solution: 12.05.1980 is a date of birth")
        .with_reply(t.issue_generation.clone(), "SOLVE DATE ISSUES")
}

#[tokio::test]
async fn test_single_accepted_date_through_document_driver() {
    let cache = TempDir::new().unwrap();
    let library = PromptLibrary::builtin();
    let llm = Arc::new(
        expert_for(
            &library,
            Category::Independent,
            &[r#"{"Next": "verification"}"#, r#"{"Next": "end"}"#],
        )
        .with_reply(
            "EXTRACT DATES",
            r#"{"extracted_information": [{"identifier": "12.05.1980", "context": "Anna was born on 12.05.1980", "reasoning": "explicit birth date"}]}"#,
        )
        .with_reply("VERIFY DATES", r#"{"bool": true, "reasoning": "stated as birth date"}"#),
    );
    let orchestrator = Orchestrator::new(llm.clone(), llm.clone(), library, config(&cache));

    let outcome = orchestrator
        .conversation(
            Arc::new(IndependentStrategy),
            "doc-1",
            "Anna was born on 12.05.1980.",
            dob(),
        )
        .run()
        .await
        .unwrap();

    assert_eq!(
        outcome.history.as_slice(),
        [Phase::Start, Phase::Extracting, Phase::Verification, Phase::End]
    );
    assert_eq!(outcome.records.len(), 1);
    let finding = outcome.records[0].finding();
    assert_eq!(finding.identifier, "12.05.1980");
    assert_eq!(finding.reasoning, "stated as birth date");

    let json = outcome.records_json().unwrap();
    let record = json[0].as_object().unwrap();
    assert_eq!(record.len(), 1);
    assert_eq!(record[finding.id.as_str()]["identifier"], "12.05.1980");

    // Through the document driver, reusing the cached prompts
    let store = Arc::new(MemoryStore::new());
    let extractor = DocumentExtractor::new(orchestrator, store.clone(), store.clone());
    let report = extractor
        .run(&Document::new("doc-1", "Anna was born on 12.05.1980."), &[dob()])
        .await;

    assert!(report.is_complete());
    assert_eq!(report.records(), 1);
    let snapshot = store.snapshot().unwrap();
    assert_eq!(snapshot["doc-1"]["date_of_birth"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_rejected_finding_is_replaced_by_correction() {
    let cache = TempDir::new().unwrap();
    let library = PromptLibrary::builtin();
    let llm = Arc::new(
        expert_for(
            &library,
            Category::Independent,
            &[
                r#"{"Next": "verification"}"#,
                r#"{'Next': 'issues_solving'}"#,
                r#"{"Next": "end"}"#,
            ],
        )
        .with_reply(
            "EXTRACT DATES",
            r#"{"extracted_information": [{"identifier": "12.05.198", "context": "born on 12.05.1980", "reasoning": "date"}]}"#,
        )
        .with_reply("VERIFY DATES", r#"{"bool": false, "reasoning": "the year is truncated"}"#)
        .with_reply(
            "SOLVE DATE ISSUES",
            r#"{"extracted_information": [{"identifier": "12.05.1980", "context": "born on 12.05.1980", "reasoning": "full date"}]}"#,
        ),
    );
    let orchestrator = Orchestrator::new(llm.clone(), llm.clone(), library, config(&cache));

    let outcome = orchestrator
        .conversation(Arc::new(IndependentStrategy), "doc-1", "Born on 12.05.1980.", dob())
        .run()
        .await
        .unwrap();

    assert_eq!(
        outcome.history.as_slice(),
        [
            Phase::Start,
            Phase::Extracting,
            Phase::Verification,
            Phase::IssueSolving,
            Phase::End
        ]
    );
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].finding().identifier, "12.05.1980");

    // The rejected finding went out to the issue solver, the corrected one has a new id
    let issue_call = &llm.calls_matching("SOLVE DATE ISSUES")[0];
    assert!(issue_call.last_user().contains("the year is truncated"));
    assert!(!issue_call
        .last_user()
        .contains(outcome.records[0].id().as_str()));
}

#[tokio::test]
async fn test_person_centric_groups_findings_in_both_paths() {
    let library = PromptLibrary::builtin();
    let persons: PersonDirectory = [
        Person::new("p-1", "Anna Schmidt").with_abbreviation("A. S."),
        Person::new("p-2", "Bernd Meier").with_alias("Bernie"),
    ]
    .into_iter()
    .collect();
    let store = Arc::new(MemoryStore::new().with_persons("doc-2", persons));
    let text = "Anna Schmidt was born on 12.05.1980. Bernd Meier was born on 03.03.1975.";
    let pii = dob().with_category(Category::Individuals);

    // Verified path
    let cache = TempDir::new().unwrap();
    let llm = Arc::new(
        expert_for(
            &library,
            Category::Individuals,
            &[r#"{"Next": "verification"}"#, r#"{"Next": "end"}"#],
        )
        .with_reply(
            "EXTRACT DATES",
            r#"{"p-1": [{"identifier": "12.05.1980", "context": "Anna Schmidt was born on 12.05.1980", "reasoning": "Anna"}],
                "p-2": [{"identifier": "03.03.1975", "context": "Bernd Meier was born on 03.03.1975", "reasoning": "Bernd"}]}"#,
        )
        .with_reply("VERIFY DATES", r#"{"bool": true, "reasoning": "matches the person"}"#),
    );
    let orchestrator = Orchestrator::new(llm.clone(), llm.clone(), library.clone(), config(&cache));
    let outcome = orchestrator
        .conversation(
            Arc::new(PersonCentricStrategy::new(store.clone())),
            "doc-2",
            text,
            pii.clone(),
        )
        .run()
        .await
        .unwrap();

    let mut owners: Vec<(String, Option<String>)> = outcome
        .records
        .iter()
        .map(|r| (r.finding().identifier.clone(), r.finding().person_uuid.clone()))
        .collect();
    owners.sort();
    assert_eq!(
        owners,
        [
            ("03.03.1975".to_string(), Some("p-2".to_string())),
            ("12.05.1980".to_string(), Some("p-1".to_string())),
        ]
    );
    let extraction_call = &llm.calls_matching("EXTRACT DATES")[0];
    assert!(extraction_call.last_user().contains("Bernie"));

    // Corrected path: Bernd's date is rejected and corrected
    let cache = TempDir::new().unwrap();
    let llm = Arc::new(
        expert_for(
            &library,
            Category::Individuals,
            &[
                r#"{"Next": "verification"}"#,
                r#"{"Next": "issues_solving"}"#,
                r#"{"Next": "end"}"#,
            ],
        )
        .with_reply(
            "EXTRACT DATES",
            r#"{"p-1": [{"identifier": "12.05.1980", "context": "Anna Schmidt was born on 12.05.1980", "reasoning": "Anna"}],
                "p-2": [{"identifier": "03.03.197", "context": "Bernd Meier was born on 03.03.1975", "reasoning": "Bernd"}]}"#,
        )
        .with_user_reply(
            r#"<solution>{"p-2""#,
            r#"{"bool": false, "reasoning": "truncated year"}"#,
        )
        .with_reply("VERIFY DATES", r#"{"bool": true, "reasoning": "matches the person"}"#)
        .with_reply(
            "SOLVE DATE ISSUES",
            r#"{"p-2": [{"identifier": "03.03.1975", "context": "Bernd Meier was born on 03.03.1975", "reasoning": "corrected"}], "p-1": []}"#,
        ),
    );
    let orchestrator = Orchestrator::new(llm.clone(), llm.clone(), library, config(&cache));
    let outcome = orchestrator
        .conversation(
            Arc::new(PersonCentricStrategy::new(store.clone())),
            "doc-2",
            text,
            pii,
        )
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.history.current(), Phase::End);
    assert_eq!(outcome.history.count(Phase::IssueSolving), 1);
    let mut owners: Vec<(String, Option<String>)> = outcome
        .records
        .iter()
        .map(|r| (r.finding().identifier.clone(), r.finding().person_uuid.clone()))
        .collect();
    owners.sort();
    assert_eq!(
        owners,
        [
            ("03.03.1975".to_string(), Some("p-2".to_string())),
            ("12.05.1980".to_string(), Some("p-1".to_string())),
        ]
    );
}

#[tokio::test]
async fn test_second_run_reuses_cached_prompt_without_authoring() {
    let cache = TempDir::new().unwrap();
    let library = PromptLibrary::builtin();
    let t = &library.independent;

    let expert = || {
        ScriptedLlm::new()
            .with_reply(t.meta_expert.clone(), INSTRUCTIONS)
            .with_reply(t.meta_expert_next_step.clone(), r#"{"Next": "end"}"#)
            .with_reply("refined prompt", r#"{"extracted_information": []}"#)
    };
    let creator = Arc::new(
        ScriptedLlm::new()
            .with_reply(t.extracting_generation.clone(), "draft prompt")
            .with_replies(
                library.general.feedback.clone(),
                ["Clarity 5/10", "refined prompt", "Clarity 9/10"],
            )
            .with_reply(t.extracting_examples.clone(), "Text: born 12.05.1980"),
    );

    let first_expert = Arc::new(expert());
    let first = Orchestrator::new(
        first_expert.clone(),
        creator.clone(),
        library.clone(),
        config(&cache).with_refinement(true),
    )
    .conversation(Arc::new(IndependentStrategy), "doc-1", "Born on 12.05.1980.", dob())
    .run()
    .await
    .unwrap();

    assert_eq!(first.prompts.len(), 1);
    assert_eq!(first.prompts[0].kind, PromptKind::Extracting);
    assert_eq!(first.prompts[0].origin, PromptOrigin::Generated);
    assert!(first.prompts[0].text.starts_with("refined prompt\n## Examples\n"));
    assert_eq!(creator.calls_matching(&library.general.feedback).len(), 3);
    assert_eq!(first_expert.calls_matching("refined prompt").len(), 1);

    let cached_file = cache
        .path()
        .join("independent/date_of_birth/date_of_birth_extracting.md");
    assert_eq!(
        std::fs::read_to_string(cached_file).unwrap(),
        first.prompts[0].text
    );

    let silent_creator = Arc::new(ScriptedLlm::new());
    let second = Orchestrator::new(
        Arc::new(expert()),
        silent_creator.clone(),
        library.clone(),
        config(&cache).with_refinement(true),
    )
    .conversation(Arc::new(IndependentStrategy), "doc-1", "Born on 12.05.1980.", dob())
    .run()
    .await
    .unwrap();

    assert_eq!(silent_creator.call_count(), 0);
    assert_eq!(second.prompts[0].origin, PromptOrigin::Cached);
    assert_eq!(second.prompts[0].text, first.prompts[0].text);
}

#[tokio::test]
async fn test_template_overrides_drive_the_conversation() {
    let cache = TempDir::new().unwrap();
    let templates = TempDir::new().unwrap();
    let dir = templates.path().join("independent");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("meta_expert_prompt.md"), "CUSTOM META EXPERT").unwrap();

    let library = PromptLibrary::builtin()
        .load_overrides(templates.path())
        .unwrap();
    assert_eq!(library.independent.meta_expert, "CUSTOM META EXPERT");

    let llm = Arc::new(
        expert_for(&library, Category::Independent, &[r#"{"Next": "end"}"#])
            .with_reply("EXTRACT DATES", r#"{"extracted_information": []}"#),
    );
    let outcome = Orchestrator::new(llm.clone(), llm.clone(), library, config(&cache))
        .conversation(Arc::new(IndependentStrategy), "doc-1", "No dates here.", dob())
        .run()
        .await
        .unwrap();

    assert!(outcome.records.is_empty());
    assert_eq!(llm.calls_matching("CUSTOM META EXPERT").len(), 1);
}

#[tokio::test]
async fn test_document_recognizes_persons_before_person_centric_types() {
    let cache = TempDir::new().unwrap();
    let library = PromptLibrary::builtin();
    let persons = library.category(Category::Persons);
    let llm = Arc::new(
        expert_for(&library, Category::Individuals, &[r#"{"Next": "end"}"#])
            .with_reply(persons.meta_expert.clone(), INSTRUCTIONS)
            .with_reply(persons.meta_expert_next_step.clone(), r#"{"Next": "end"}"#)
            .with_reply(persons.extracting_generation.clone(), "RECOGNIZE PERSONS")
            .with_reply(persons.extracting_examples.clone(), "Text: Jane Roe met John Doe")
            .with_reply(persons.verifying_generation.clone(), "VERIFY PERSONS")
            .with_reply(persons.verifying_examples.clone(), "Solution: Jane Roe is a person")
            .with_reply(
                "RECOGNIZE PERSONS",
                r#"{"Persons": [{"full name": "Anna Schmidt", "abbreviations": ["A. S."], "aliases": []}]}"#,
            )
            .with_reply("VERIFY PERSONS", r#"{"bool": true, "reasoning": "named in the text"}"#)
            .with_reply("EXTRACT DATES", "{}"),
    );
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(llm.clone(), llm.clone(), library, config(&cache));
    let extractor = DocumentExtractor::new(orchestrator, store.clone(), store.clone());

    let report = extractor
        .run(
            &Document::new("doc-3", "Anna Schmidt (A. S.) was born in Bonn."),
            &[dob().with_category(Category::Individuals)],
        )
        .await;

    assert!(report.is_complete());
    let mut completed: Vec<(String, usize)> = report
        .completed
        .iter()
        .map(|s| (s.pii.clone(), s.records))
        .collect();
    completed.sort();
    assert_eq!(
        completed,
        [("date_of_birth".to_string(), 0), ("person".to_string(), 1)]
    );

    // The recognized person is verified and stored before dates are extracted
    let calls = llm.calls();
    let recognized_at = calls
        .iter()
        .position(|c| c.system_prompt.contains("RECOGNIZE PERSONS"))
        .unwrap();
    let extracted_at = calls
        .iter()
        .position(|c| c.system_prompt.contains("EXTRACT DATES"))
        .unwrap();
    assert!(recognized_at < extracted_at);
    assert_eq!(llm.calls_matching("VERIFY PERSONS").len(), 1);
    assert!(calls[extracted_at].last_user().contains("Anna Schmidt"));

    let directory = store.persons_snapshot();
    let stored = directory["doc-3"].as_object().unwrap();
    assert_eq!(stored.len(), 1);
    let person = stored.values().next().unwrap();
    assert_eq!(person["full name"], "Anna Schmidt");
    assert_eq!(person["abbreviations"][0], "A. S.");
}

#[tokio::test]
async fn test_disabled_recognition_leaves_directory_untouched() {
    let cache = TempDir::new().unwrap();
    let library = PromptLibrary::builtin();
    let llm = Arc::new(
        expert_for(&library, Category::Individuals, &[r#"{"Next": "end"}"#])
            .with_reply("EXTRACT DATES", "{}"),
    );
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(
        llm.clone(),
        llm.clone(),
        library.clone(),
        config(&cache).with_person_recognition(false),
    );

    let report = DocumentExtractor::new(orchestrator, store.clone(), store.clone())
        .run(
            &Document::new("doc-4", "Anna Schmidt was born in Bonn."),
            &[dob().with_category(Category::Individuals)],
        )
        .await;

    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.completed[0].pii, "date_of_birth");
    assert!(llm
        .calls_matching(&library.category(Category::Persons).meta_expert)
        .is_empty());
}
