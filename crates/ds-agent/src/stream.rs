//! Adapters over answer text streams.

use futures::StreamExt;

use ds_core::TextStream;

/// Call `on_finish` with the full text once `stream` ends successfully.
///
/// The callback is skipped when the stream yields an error or is dropped
/// before it ends.
pub fn with_on_finish<F>(stream: TextStream, on_finish: F) -> TextStream
where
    F: FnOnce(String) + Send + 'static,
{
    let state = (stream, String::new(), Some(on_finish));
    Box::pin(futures::stream::unfold(
        state,
        |(mut stream, mut text, mut on_finish)| async move {
            match stream.next().await {
                Some(Ok(fragment)) => {
                    text.push_str(&fragment);
                    Some((Ok(fragment), (stream, text, on_finish)))
                }
                Some(Err(e)) => Some((Err(e), (stream, text, None))),
                None => {
                    if let Some(f) = on_finish.take() {
                        f(text);
                    }
                    None
                }
            }
        },
    ))
}
