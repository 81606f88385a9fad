//! End of run summary.
use tabled::Table;
use tabled::Tabled;
use tabled::settings::Alignment;
use tabled::settings::Modify;
use tabled::settings::Style;
use tabled::settings::object::{Columns, Rows};

use crate::command::duration_string;
use crate::image::BuiltImage;
use crate::utils::filename_to_string;

#[derive(Tabled)]
struct ImageRow {
    image: String,
    size: u64,
    #[tabled(rename = "compressed")]
    compressed_size: u64,
    duration: String,
}

fn to_row(image: &BuiltImage) -> ImageRow {
    ImageRow {
        image: filename_to_string(&image.path)
            .unwrap_or_else(|_| image.path.display().to_string()),
        size: image.facts.size,
        compressed_size: image.compressed_size,
        duration: duration_string(&image.duration),
    }
}

/// Markdown table of the images built in this run.
pub fn images_to_string(images: &[BuiltImage]) -> String {
    let data: Vec<ImageRow> = images.iter().map(to_row).collect();

    Table::new(data)
        .with(Style::markdown())
        .with(Modify::new(Rows::new(..)).with(Alignment::left()))
        .with(Modify::new(Columns::new(1..3)).with(Alignment::right()))
        .to_string()
}
