use crate::environment::Environment;
use crate::error::DumpError;
use crate::exec::{run_lines, CommandRunner};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

impl<R: CommandRunner> Environment<'_, R> {
    pub fn dump_logs(&self, archive_name: &str, target_dir: &Path) -> Result<PathBuf, DumpError> {
        fs::create_dir_all(target_dir)?;
        let staging = tempfile::tempdir()?;

        let mut written = Vec::new();
        for service in self.services() {
            let invocation = self.compose(["logs", "--no-color", service.as_str()]);
            let result = match run_lines(self.runner(), &invocation, self.settings().command_timeout) {
                Ok(result) => result,
                Err(err) => {
                    warn!(namespace = self.namespace(), service = %service, error = %err, "skipping logs");
                    continue;
                }
            };
            let entry_name = format!("log_{service}");
            let path = staging.path().join(&entry_name);
            let mut content = result.lines.join("\n");
            content.push('\n');
            if let Err(err) = fs::write(&path, content) {
                warn!(service = %service, path = %path.display(), error = %err, "could not write service log");
                continue;
            }
            written.push((entry_name, path));
        }

        let archive_path = target_dir.join(format!("{archive_name}.zip"));
        write_archive(&archive_path, &written)?;
        info!(
            namespace = self.namespace(),
            archive = %archive_path.display(),
            services = written.len(),
            "logs archived"
        );
        Ok(archive_path)
    }
}

fn write_archive(archive_path: &Path, entries: &[(String, PathBuf)]) -> Result<(), DumpError> {
    let file = File::create(archive_path)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (entry_name, path) in entries {
        let content = fs::read(path)?;
        zip.start_file(entry_name.as_str(), options)?;
        zip.write_all(&content)?;
    }
    zip.finish()?;
    Ok(())
}
