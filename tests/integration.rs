//! Integration tests for the chapterhouse crate.
//!
//! These load real files from disk, extract their chapter structure and run
//! single-book pipelines end to end.

use chapterhouse::error::Result;
use chapterhouse::prelude::*;
use tokio::fs;
use tokio::time::timeout;

mod common;
use common::{
    EpubFixture, FakeSynthesizer, LONG_TEST_TIMEOUT, TocKind, setup_test_dirs,
    write_three_chapter_epub,
};

fn titles_and_levels(tree: &ChapterTree) -> Vec<(String, usize)> {
    tree.flatten(tree.root(), None)
        .into_iter()
        .map(|id| (tree[id].title.clone(), tree[id].level()))
        .collect()
}

#[tokio::test]
async fn test_three_chapter_epub_combined() -> Result<()> {
    let test_dirs = setup_test_dirs("three_chapter_combined").await;
    let book_path = test_dirs.source_dir.join("book.epub");
    write_three_chapter_epub(&book_path)?;

    let book = SourceBook::open(&book_path)?;
    assert_eq!(book.metadata.title, "Three Chapters");
    assert_eq!(book.metadata.author, "Test Author");
    assert_eq!(book.documents.len(), 3);
    assert_eq!(book.toc.len(), 3);

    let structure = StructureExtractor::new(DetectionMethod::Combined).extract(&book)?;
    let tree = &structure.tree;
    assert_eq!(
        titles_and_levels(tree),
        vec![
            ("Chapter 1".to_string(), 1),
            ("Chapter 2".to_string(), 1),
            ("Chapter 3".to_string(), 1),
        ]
    );

    let first = tree.flatten(tree.root(), None)[0];
    assert_eq!(tree[first].paragraphs, vec!["It began.", "Then more happened."]);
    assert_eq!(structure.report.toc_entries, 3);
    assert_eq!(structure.report.toc_chapter_like_titles, 3);
    assert_eq!(structure.report.chapters_without_text, 0);
    assert!(!structure.report.fallback_used);
    Ok(())
}

#[tokio::test]
async fn test_ncx_toc_is_used_without_nav() -> Result<()> {
    let test_dirs = setup_test_dirs("ncx_toc").await;
    let book_path = test_dirs.source_dir.join("ncx.epub");
    EpubFixture::new("Old Style")
        .toc(TocKind::Ncx)
        .chapter("Prologue", &["Before."])
        .chapter("Chapter 1", &["During."])
        .write(&book_path)?;

    let book = SourceBook::open(&book_path)?;
    assert_eq!(book.toc.len(), 2);
    assert_eq!(book.toc[1].href.as_deref(), Some("OEBPS/text/chapter02.xhtml"));

    let structure = StructureExtractor::new(DetectionMethod::TocOnly).extract(&book)?;
    let tree = &structure.tree;
    let nodes = tree.flatten(tree.root(), None);
    assert_eq!(nodes.len(), 2);
    assert_eq!(tree[nodes[1]].paragraphs, vec!["During."]);
    Ok(())
}

#[tokio::test]
async fn test_combined_grafts_subheadings_under_toc_leaf() -> Result<()> {
    let test_dirs = setup_test_dirs("combined_subheadings").await;
    let book_path = test_dirs.source_dir.join("scenes.epub");
    EpubFixture::new("Scenes")
        .raw_chapter(
            "Chapter 1",
            "<h1>Chapter 1</h1><p>Intro.</p><h2>Scene One</h2><p>First scene.</p><h2>Scene Two</h2><p>Second scene.</p>",
        )
        .raw_chapter("The Beginning", "<h1>Chapter 2</h1><p>Elsewhere.</p>")
        .write(&book_path)?;

    let book = SourceBook::open(&book_path)?;
    let structure = StructureExtractor::new(DetectionMethod::Combined).extract(&book)?;
    assert_eq!(
        titles_and_levels(&structure.tree),
        vec![
            ("Chapter 1".to_string(), 1),
            ("Scene One".to_string(), 2),
            ("Scene Two".to_string(), 2),
            ("The Beginning".to_string(), 1),
        ]
    );
    let nodes = structure.tree.flatten(structure.tree.root(), None);
    assert_eq!(structure.tree[nodes[3]].paragraphs, vec!["Elsewhere."]);
    assert_eq!(structure.report.depth, 2);
    Ok(())
}

#[tokio::test]
async fn test_auto_without_toc_uses_headings() -> Result<()> {
    let test_dirs = setup_test_dirs("auto_no_toc").await;
    let book_path = test_dirs.source_dir.join("bare.epub");
    EpubFixture::new("Bare")
        .toc(TocKind::None)
        .raw_chapter("ignored", "<h1>Part 1</h1><h2>Chapter 1</h2><p>One.</p>")
        .raw_chapter("ignored", "<h2>Chapter 2</h2><p>Two.</p>")
        .write(&book_path)?;

    let book = SourceBook::open(&book_path)?;
    assert!(book.toc.is_empty());

    let structure = StructureExtractor::new(DetectionMethod::Auto).extract(&book)?;
    assert!(structure.report.fallback_used);
    assert_eq!(structure.report.method_applied, DetectionMethod::HeadingsOnly);
    assert_eq!(
        titles_and_levels(&structure.tree),
        vec![
            ("Part 1".to_string(), 1),
            ("Chapter 1".to_string(), 2),
            ("Chapter 2".to_string(), 2),
        ]
    );

    let err = StructureExtractor::new(DetectionMethod::TocOnly)
        .extract(&book)
        .unwrap_err();
    assert!(err.to_string().contains("toc"));
    Ok(())
}

#[tokio::test]
async fn test_plain_text_and_html_books() -> Result<()> {
    let test_dirs = setup_test_dirs("plain_books").await;

    let text_path = test_dirs.source_dir.join("story.txt");
    fs::write(
        &text_path,
        "Chapter 1\n\nThe first line\ncontinues here.\n\nChapter 2\n\nAnother paragraph.\n",
    )
    .await?;
    let book = SourceBook::open(&text_path)?;
    assert_eq!(book.metadata.title, "story");
    let structure = StructureExtractor::new(DetectionMethod::Auto).extract(&book)?;
    let tree = &structure.tree;
    let nodes = tree.flatten(tree.root(), None);
    assert_eq!(nodes.len(), 2);
    assert_eq!(tree[nodes[0]].paragraphs, vec!["The first line continues here."]);

    let html_path = test_dirs.source_dir.join("page.html");
    fs::write(
        &html_path,
        "<html><head><title>A Page</title></head><body><h2>Chapter 1</h2><p>Hello&nbsp;there.</p></body></html>",
    )
    .await?;
    let book = SourceBook::open(&html_path)?;
    assert_eq!(book.metadata.title, "A Page");
    let structure = StructureExtractor::new(DetectionMethod::HeadingsOnly).extract(&book)?;
    assert_eq!(structure.tree.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_export_only_writes_text_and_structure() -> Result<()> {
    let test_dirs = setup_test_dirs("export_only").await;
    let book_path = test_dirs.source_dir.join("book.epub");
    write_three_chapter_epub(&book_path)?;

    let config = BatchConfig::builder()
        .input_path(book_path.clone())
        .output_dir(test_dirs.target_dir.clone())
        .export_only(true)
        .build()?;
    let mut processor = BatchProcessor::new(config);

    let result = timeout(LONG_TEST_TIMEOUT, processor.process())
        .await
        .expect("Test timed out")?;

    assert_eq!(result.completed(), 1);
    let task = &result.tasks[0];
    assert_eq!(task.status(), ProcessingStatus::Completed);
    assert_eq!(task.chapter_count, 3);
    assert!(task.derived_audio_path.is_none());

    let text_path = test_dirs.target_dir.join("book.chapters.txt");
    assert_eq!(task.derived_text_path.as_deref(), Some(text_path.as_path()));
    let text = fs::read_to_string(&text_path).await?;
    assert!(text.starts_with("Title: Three Chapters\nAuthor: Test Author\n\n# Title\n"));
    assert!(text.contains("# Chapter 1\n\nIt began.\n\nThen more happened.\n\n# Chapter 2\n"));

    let structure = fs::read_to_string(test_dirs.target_dir.join("book.structure.json")).await?;
    let json: serde_json::Value = serde_json::from_str(&structure)?;
    assert_eq!(json["chapters"].as_array().map(Vec::len), Some(3));
    assert_eq!(json["report"]["method_applied"], "combined");

    assert!(!test_dirs.target_dir.join(".chapterhouse_state.json").exists());
    Ok(())
}

#[tokio::test]
async fn test_full_conversion_with_fake_synthesizer() -> Result<()> {
    let test_dirs = setup_test_dirs("full_conversion").await;
    let book_path = test_dirs.source_dir.join("book.epub");
    write_three_chapter_epub(&book_path)?;

    let synthesizer = FakeSynthesizer::new();
    let config = BatchConfig::builder()
        .input_path(book_path.clone())
        .output_dir(test_dirs.target_dir.clone())
        .hierarchy_style(HierarchyStyle::Numbered)
        .rate("+10%")
        .build()?;
    let mut processor = BatchProcessor::new(config).with_synthesizer(synthesizer.clone());

    let result = timeout(LONG_TEST_TIMEOUT, processor.process())
        .await
        .expect("Test timed out")?;
    assert_eq!(result.completed(), 1, "{}", result.summary());

    let audio_path = test_dirs.target_dir.join("book (en-US-AndrewNeural).mp3");
    assert_eq!(
        result.tasks[0].derived_audio_path.as_deref(),
        Some(audio_path.as_path())
    );
    let audio = fs::read_to_string(&audio_path).await?;
    assert_eq!(audio, "[1 Chapter 1][2 Chapter 2][3 Chapter 3]");

    assert_eq!(synthesizer.call_count(), 3);
    let calls = synthesizer.calls.lock().unwrap().clone();
    assert!(calls.iter().all(|c| c.rate.as_deref() == Some("+10%")));
    assert!(calls[0].text.contains("It began."));

    assert!(!test_dirs.target_dir.join(".book.chapters").exists());
    Ok(())
}

#[tokio::test]
async fn test_chapter_selection_limits_synthesis() -> Result<()> {
    let test_dirs = setup_test_dirs("chapter_selection").await;
    let book_path = test_dirs.source_dir.join("book.epub");
    write_three_chapter_epub(&book_path)?;

    let synthesizer = FakeSynthesizer::new();
    let config = BatchConfig::builder()
        .input_path(book_path)
        .output_dir(test_dirs.target_dir.clone())
        .chapters("2-")
        .build()?;
    let mut processor = BatchProcessor::new(config).with_synthesizer(synthesizer.clone());
    let result = timeout(LONG_TEST_TIMEOUT, processor.process())
        .await
        .expect("Test timed out")?;

    assert_eq!(result.tasks[0].chapter_count, 2);
    assert_eq!(
        synthesizer
            .texts()
            .iter()
            .map(|t| t.lines().next().unwrap_or_default().to_string())
            .collect::<Vec<_>>(),
        vec!["Chapter 2", "Chapter 3"]
    );
    Ok(())
}

#[tokio::test]
async fn test_conversion_without_synthesizer_fails_the_book() -> Result<()> {
    let test_dirs = setup_test_dirs("no_synthesizer").await;
    let book_path = test_dirs.source_dir.join("book.epub");
    write_three_chapter_epub(&book_path)?;

    let config = BatchConfig::builder()
        .input_path(book_path)
        .output_dir(test_dirs.target_dir.clone())
        .build()?;
    let mut processor = BatchProcessor::new(config);
    let result = timeout(LONG_TEST_TIMEOUT, processor.process())
        .await
        .expect("Test timed out")?;

    let task = &result.tasks[0];
    assert_eq!(task.status(), ProcessingStatus::Failed);
    assert!(task.error_message().unwrap().contains("No synthesizer"));
    // The text export still happened before conversion was attempted.
    assert!(task.derived_text_path.is_some());
    Ok(())
}

fn first_lines(synthesizer: &FakeSynthesizer) -> Vec<String> {
    synthesizer
        .texts()
        .iter()
        .map(|t| t.lines().next().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn test_combined_toc_titles_differing_from_headings_plan_each_chapter_once() -> Result<()> {
    let test_dirs = setup_test_dirs("combined_differing_titles").await;
    let book_path = test_dirs.source_dir.join("whale.epub");
    EpubFixture::new("Moby-Dick")
        .raw_chapter(
            "Loomings",
            "<h1>Chapter 1: Loomings</h1><p>Call me Ishmael.</p><p>Some years ago.</p>",
        )
        .raw_chapter(
            "The Carpet-Bag",
            "<h1>Chapter 2: The Carpet-Bag</h1><p>I stuffed a shirt or two.</p>",
        )
        .write(&book_path)?;

    let book = SourceBook::open(&book_path)?;
    let structure = StructureExtractor::new(DetectionMethod::Combined).extract(&book)?;
    assert_eq!(
        titles_and_levels(&structure.tree),
        vec![("Loomings".to_string(), 1), ("The Carpet-Bag".to_string(), 1)]
    );

    let synthesizer = FakeSynthesizer::new();
    let config = BatchConfig::builder()
        .input_path(book_path)
        .output_dir(test_dirs.target_dir.clone())
        .detection_method(DetectionMethod::Combined)
        .build()?;
    let mut processor = BatchProcessor::new(config).with_synthesizer(synthesizer.clone());
    let result = timeout(LONG_TEST_TIMEOUT, processor.process())
        .await
        .expect("Test timed out")?;

    assert_eq!(result.completed(), 1, "{}", result.summary());
    assert_eq!(result.tasks[0].chapter_count, 2);
    assert_eq!(first_lines(&synthesizer), vec!["Loomings", "The Carpet-Bag"]);
    let texts = synthesizer.texts();
    assert_eq!(texts.iter().filter(|t| t.contains("Call me Ishmael.")).count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unanchored_toc_entries_into_one_document() -> Result<()> {
    let test_dirs = setup_test_dirs("unanchored_single_document").await;
    let book_path = test_dirs.source_dir.join("single.epub");
    EpubFixture::new("One File")
        .raw_chapter(
            "One File",
            "<h1>Chapter 1</h1><p>One.</p><h1>Chapter 2</h1><p>Two.</p><h1>Chapter 3</h1><p>Three.</p>",
        )
        .toc_entry("Chapter 1", 0)
        .toc_entry("Chapter 2", 0)
        .toc_entry("Chapter 3", 0)
        .write(&book_path)?;

    let book = SourceBook::open(&book_path)?;
    assert_eq!(book.documents.len(), 1);
    assert_eq!(book.toc.len(), 3);

    let structure = StructureExtractor::new(DetectionMethod::Combined).extract(&book)?;
    let tree = &structure.tree;
    assert_eq!(
        titles_and_levels(tree),
        vec![
            ("Chapter 1".to_string(), 1),
            ("Chapter 2".to_string(), 1),
            ("Chapter 3".to_string(), 1),
        ]
    );
    let paragraphs: Vec<_> = tree
        .flatten(tree.root(), None)
        .into_iter()
        .map(|id| tree[id].paragraphs.clone())
        .collect();
    assert_eq!(paragraphs, vec![vec!["One."], vec!["Two."], vec!["Three."]]);

    let plan = SynthesisPlan::from_tree(tree, HierarchyStyle::Flat, None, None, None);
    assert_eq!(plan.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_html_book_converts_with_default_config() -> Result<()> {
    let test_dirs = setup_test_dirs("html_default_config").await;
    let book_path = test_dirs.source_dir.join("page.html");
    fs::write(
        &book_path,
        "<html><head><title>Salt & Pepper</title></head><body>\
         <h1>Chapter 1</h1><p>Salt & pepper &amp; more.</p>\
         <h1>Chapter 2</h1><p>Dessert.</p></body></html>",
    )
    .await?;

    let book = SourceBook::open(&book_path)?;
    assert_eq!(book.metadata.title, "Salt & Pepper");

    let synthesizer = FakeSynthesizer::new();
    let config = BatchConfig::builder()
        .input_path(test_dirs.source_dir.clone())
        .build()?;
    let mut processor = BatchProcessor::new(config).with_synthesizer(synthesizer.clone());
    let result = timeout(LONG_TEST_TIMEOUT, processor.process())
        .await
        .expect("Test timed out")?;

    assert_eq!(result.total(), 1);
    assert_eq!(result.completed(), 1, "{}", result.summary());
    assert_eq!(first_lines(&synthesizer), vec!["Chapter 1", "Chapter 2"]);
    assert!(synthesizer.texts()[0].contains("Salt & pepper & more."));
    assert!(
        test_dirs
            .source_dir
            .join("page (en-US-AndrewNeural).mp3")
            .exists()
    );
    Ok(())
}

#[tokio::test]
async fn test_second_run_ignores_own_exports() -> Result<()> {
    let test_dirs = setup_test_dirs("second_run_exports").await;
    let book_path = test_dirs.source_dir.join("story.txt");
    fs::write(
        &book_path,
        "Chapter 1\n\nFirst.\n\nChapter 2\n\nSecond.\n",
    )
    .await?;

    for _ in 0..2 {
        let config = BatchConfig::builder()
            .input_path(test_dirs.source_dir.clone())
            .export_only(true)
            .build()?;
        let mut processor = BatchProcessor::new(config);
        let result = timeout(LONG_TEST_TIMEOUT, processor.process())
            .await
            .expect("Test timed out")?;

        assert_eq!(result.total(), 1, "{}", result.summary());
        assert_eq!(result.tasks[0].source_path, book_path);
        assert_eq!(result.completed(), 1);
    }

    assert!(test_dirs.source_dir.join("story.chapters.txt").exists());
    assert!(test_dirs.source_dir.join("story.structure.json").exists());
    let source = fs::read_to_string(&book_path).await?;
    assert!(!source.starts_with("Title:"));
    Ok(())
}

#[tokio::test]
async fn test_content_filter_drops_front_and_back_matter() -> Result<()> {
    let test_dirs = setup_test_dirs("content_filter").await;
    let book_path = test_dirs.source_dir.join("edition.epub");
    EpubFixture::new("Annotated Edition")
        .chapter("Copyright", &["All rights reserved."])
        .chapter("Translator's Preface", &["On this translation."])
        .chapter("Chapter 1", &["Story.", "More story.", "Notes", "1. A note."])
        .chapter("Index", &["Whale, 1"])
        .write(&book_path)?;

    let filter = ContentFilter {
        remove_inline_notes: true,
        ..ContentFilter::matter()
    };
    let config = BatchConfig::builder()
        .input_path(book_path)
        .output_dir(test_dirs.target_dir.clone())
        .export_only(true)
        .content_filter(filter)
        .build()?;
    let mut processor = BatchProcessor::new(config);
    let result = timeout(LONG_TEST_TIMEOUT, processor.process())
        .await
        .expect("Test timed out")?;

    assert_eq!(result.completed(), 1, "{}", result.summary());
    assert_eq!(result.tasks[0].chapter_count, 2);
    let text = fs::read_to_string(test_dirs.target_dir.join("edition.chapters.txt")).await?;
    assert!(text.contains("# Translator's Preface\n"));
    assert!(text.contains("# Chapter 1\n\nStory.\n\nMore story.\n\n"));
    assert!(!text.contains("A note."));
    assert!(!text.contains("# Copyright"));
    assert!(!text.contains("# Index"));
    Ok(())
}
