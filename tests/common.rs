//! Common test utilities and constants for the chapterhouse crate.
//!
//! Provides unique test directories, EPUB/HTML/text fixture writers and a
//! scriptable fake synthesizer.

use async_trait::async_trait;
use chapterhouse::error::{Error, Result};
use chapterhouse::synthesis::{SynthesisRequest, Synthesizer};
use rand::{Rng, distributions::Alphanumeric};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

#[allow(dead_code)]
pub const TEST_TMP_DIR: &str = "tests/tmp";
#[allow(dead_code)]
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);
#[allow(dead_code)]
pub const LONG_TEST_TIMEOUT: Duration = Duration::from_secs(120);

#[allow(dead_code)]
pub struct TestDirs {
    pub test_dir: PathBuf,
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
}

/// Creates a fresh, uniquely named test directory with `source` and
/// `target` subdirectories.
#[allow(dead_code)]
pub async fn setup_test_dirs(sub_path: &str) -> TestDirs {
    let rand_string: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let test_dir = PathBuf::from(TEST_TMP_DIR).join(format!("{}-{}", sub_path, rand_string));
    if test_dir.exists() {
        fs::remove_dir_all(&test_dir).await.unwrap();
    }
    let source_dir = test_dir.join("source");
    let target_dir = test_dir.join("target");

    fs::create_dir_all(&source_dir).await.unwrap();
    fs::create_dir_all(&target_dir).await.unwrap();

    TestDirs {
        test_dir,
        source_dir,
        target_dir,
    }
}

/// Removes the whole temporary test tree.
#[allow(dead_code)]
pub async fn cleanup_all_test_dirs() {
    let test_dir = PathBuf::from(TEST_TMP_DIR);
    if test_dir.exists() {
        let _ = fs::remove_dir_all(&test_dir).await;
    }
}

/// How the fixture declares its table of contents.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TocKind {
    Nav,
    Ncx,
    None,
}

/// Builder for small but well-formed EPUB files.
#[allow(dead_code)]
pub struct EpubFixture {
    title: String,
    author: String,
    toc: TocKind,
    /// (TOC title, chapter body markup)
    chapters: Vec<(String, String)>,
    /// Explicit TOC as (title, chapter index). Empty means one entry per
    /// chapter.
    toc_entries: Vec<(String, usize)>,
}

#[allow(dead_code)]
impl EpubFixture {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            author: "Test Author".to_string(),
            toc: TocKind::Nav,
            chapters: Vec::new(),
            toc_entries: Vec::new(),
        }
    }

    pub fn toc(mut self, toc: TocKind) -> Self {
        self.toc = toc;
        self
    }

    /// Adds a chapter whose document opens with `<h1>title</h1>` followed by
    /// one `<p>` per paragraph.
    pub fn chapter(self, title: &str, paragraphs: &[&str]) -> Self {
        let mut body = format!("<h1>{}</h1>\n", title);
        for paragraph in paragraphs {
            body.push_str(&format!("<p>{}</p>\n", paragraph));
        }
        self.raw_chapter(title, &body)
    }

    /// Adds a chapter with arbitrary body markup.
    pub fn raw_chapter(mut self, title: &str, body: &str) -> Self {
        self.chapters.push((title.to_string(), body.to_string()));
        self
    }

    /// Adds a TOC entry titled `title` pointing at chapter `chapter`
    /// (0-based), without an anchor. Once used, only explicit entries are
    /// listed.
    pub fn toc_entry(mut self, title: &str, chapter: usize) -> Self {
        self.toc_entries.push((title.to_string(), chapter));
        self
    }

    fn entries(&self) -> Vec<(String, String)> {
        if self.toc_entries.is_empty() {
            self.chapters
                .iter()
                .enumerate()
                .map(|(i, (title, _))| (title.clone(), Self::chapter_file(i)))
                .collect()
        } else {
            self.toc_entries
                .iter()
                .map(|(title, i)| (title.clone(), Self::chapter_file(*i)))
                .collect()
        }
    }

    fn chapter_file(index: usize) -> String {
        format!("text/chapter{:02}.xhtml", index + 1)
    }

    fn opf(&self) -> String {
        let mut manifest = String::new();
        let mut spine = String::new();
        for i in 0..self.chapters.len() {
            manifest.push_str(&format!(
                "    <item id=\"c{i}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
                Self::chapter_file(i)
            ));
            spine.push_str(&format!("    <itemref idref=\"c{i}\"/>\n"));
        }
        match self.toc {
            TocKind::Nav => manifest.push_str(
                "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n",
            ),
            TocKind::Ncx => manifest.push_str(
                "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n",
            ),
            TocKind::None => {}
        }
        let spine_attr = if self.toc == TocKind::Ncx {
            " toc=\"ncx\""
        } else {
            ""
        };
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="id">urn:uuid:fixture</dc:identifier>
    <dc:title>{}</dc:title>
    <dc:creator>{}</dc:creator>
  </metadata>
  <manifest>
{}  </manifest>
  <spine{}>
{}  </spine>
</package>"#,
            self.title, self.author, manifest, spine_attr, spine
        )
    }

    fn nav(&self) -> String {
        let items: String = self
            .entries()
            .iter()
            .map(|(title, href)| format!("      <li><a href=\"{}\">{}</a></li>\n", href, title))
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Contents</title></head>
<body>
  <nav epub:type="toc" id="toc">
    <ol>
{}    </ol>
  </nav>
</body>
</html>"#,
            items
        )
    }

    fn ncx(&self) -> String {
        let points: String = self
            .entries()
            .iter()
            .enumerate()
            .map(|(i, (title, href))| {
                format!(
                    "    <navPoint id=\"p{i}\" playOrder=\"{}\"><navLabel><text>{}</text></navLabel><content src=\"{}\"/></navPoint>\n",
                    i + 1,
                    title,
                    href
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
{}  </navMap>
</ncx>"#,
            points
        )
    }

    fn chapter_document(title: &str, body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>{}</title></head>
<body>
{}</body>
</html>"#,
            title, body
        )
    }

    /// Writes the EPUB to `path`, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut zip = ZipWriter::new(std::fs::File::create(path)?);
        let stored =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let deflated =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        zip.start_file("mimetype", stored)?;
        zip.write_all(b"application/epub+zip")?;

        zip.start_file("META-INF/container.xml", deflated)?;
        zip.write_all(
            br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#,
        )?;

        zip.start_file("OEBPS/content.opf", deflated)?;
        zip.write_all(self.opf().as_bytes())?;

        match self.toc {
            TocKind::Nav => {
                zip.start_file("OEBPS/nav.xhtml", deflated)?;
                zip.write_all(self.nav().as_bytes())?;
            }
            TocKind::Ncx => {
                zip.start_file("OEBPS/toc.ncx", deflated)?;
                zip.write_all(self.ncx().as_bytes())?;
            }
            TocKind::None => {}
        }

        for (i, (title, body)) in self.chapters.iter().enumerate() {
            zip.start_file(format!("OEBPS/{}", Self::chapter_file(i)), deflated)?;
            zip.write_all(Self::chapter_document(title, body).as_bytes())?;
        }

        zip.finish()?;
        Ok(())
    }
}

/// Writes a three-chapter EPUB with a navigation TOC.
#[allow(dead_code)]
pub fn write_three_chapter_epub(path: &Path) -> Result<()> {
    EpubFixture::new("Three Chapters")
        .chapter("Chapter 1", &["It began.", "Then more happened."])
        .chapter("Chapter 2", &["The middle."])
        .chapter("Chapter 3", &["The end."])
        .write(path)
}

/// Writes a file that has an `.epub` name but is not a zip archive.
#[allow(dead_code)]
pub async fn write_corrupt_epub(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, b"this is not a zip archive").await?;
    Ok(())
}

/// Synthesizer double that records every request and can be told to fail,
/// panic or stall when a request's text contains a marker.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct FakeSynthesizer {
    pub calls: Arc<Mutex<Vec<SynthesisRequest>>>,
    fail_on: Option<String>,
    panic_on: Option<String>,
    stall_on: Option<(String, Duration)>,
}

#[allow(dead_code)]
impl FakeSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, marker: &str) -> Self {
        self.fail_on = Some(marker.to_string());
        self
    }

    pub fn panic_on(mut self, marker: &str) -> Self {
        self.panic_on = Some(marker.to_string());
        self
    }

    pub fn stall_on(mut self, marker: &str, delay: Duration) -> Self {
        self.stall_on = Some((marker.to_string(), delay));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn texts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.text.clone())
            .collect()
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push(request.clone());

        if let Some((marker, delay)) = &self.stall_on
            && request.text.contains(marker.as_str())
        {
            tokio::time::sleep(*delay).await;
        }
        if let Some(marker) = &self.panic_on
            && request.text.contains(marker.as_str())
        {
            panic!("synthesizer crashed on '{}'", marker);
        }
        if let Some(marker) = &self.fail_on
            && request.text.contains(marker.as_str())
        {
            return Err(Error::Synthesis(format!("voice rejected '{}'", marker)));
        }

        let first_line = request.text.lines().next().unwrap_or_default();
        Ok(format!("[{}]", first_line).into_bytes())
    }
}
