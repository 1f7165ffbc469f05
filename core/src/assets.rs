//! Files compiled into the library.

use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "assets/"]
struct Asset;

/// Contents of an embedded text file.
pub(crate) fn text(name: &str) -> Option<String> {
    let file = Asset::get(name)?;
    std::str::from_utf8(file.data.as_ref()).ok().map(str::to_owned)
}
