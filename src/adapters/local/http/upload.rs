use axum::{body::Bytes, BoxError};
use futures::{Stream, TryStreamExt};
use std::io;
use std::path::{Component, Path};
use tokio::{fs::File, io::BufWriter};
use tokio_util::io::StreamReader;
use tracing::debug;

/// Save a `Stream` to a file, creating missing parent directories.
pub async fn stream_to_file<S, E>(path: &Path, stream: S) -> io::Result<u64>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let body_with_io_error = stream.map_err(|err| io::Error::new(io::ErrorKind::Other, err));
    let body_reader = StreamReader::new(body_with_io_error);
    futures::pin_mut!(body_reader);

    let mut file = BufWriter::new(File::create(path).await?);
    let written = tokio::io::copy(&mut body_reader, &mut file).await?;
    tokio::io::AsyncWriteExt::flush(&mut file).await?;

    debug!(path = %path.display(), bytes = written, "upload saved");
    Ok(written)
}

/// A client-supplied relative path (`folder/file.jpg`) that stays inside the
/// staging directory: plain components only.
pub fn path_is_valid(path: &Path) -> bool {
    let mut components = path.components().peekable();
    if components.peek().is_none() {
        return false;
    }
    components.all(|component| matches!(component, Component::Normal(_)))
}
