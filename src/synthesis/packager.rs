use crate::error::Result;
use crate::synthesis::{Packager, SynthesisPlan};
use async_trait::async_trait;
use log::debug;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Packager that concatenates chapter files byte for byte.
///
/// Works for stream formats such as MP3 where concatenated frames play back
/// as one file. Container formats need a dedicated packager.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatPackager;

#[async_trait]
impl Packager for ConcatPackager {
    async fn package(
        &self,
        chapters: &[PathBuf],
        plan: &SynthesisPlan,
        output_path: &Path,
    ) -> Result<()> {
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut output = fs::File::create(output_path).await?;
        for chapter in chapters {
            let bytes = fs::read(chapter).await?;
            output.write_all(&bytes).await?;
        }
        output.flush().await?;

        debug!(
            "Packaged {} chapter file(s) ({} planned) into {:?}",
            chapters.len(),
            plan.len(),
            output_path
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_concatenates_in_order() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("chapterhouse-concat-{}", std::process::id()));
        fs::create_dir_all(&dir).await?;
        let first = dir.join("0001.mp3");
        let second = dir.join("0002.mp3");
        fs::write(&first, b"one-").await?;
        fs::write(&second, b"two").await?;

        let output = dir.join("book (voice).mp3");
        ConcatPackager
            .package(&[first, second], &SynthesisPlan::default(), &output)
            .await?;
        assert_eq!(fs::read(&output).await?, b"one-two");

        fs::remove_dir_all(&dir).await?;
        Ok(())
    }
}
