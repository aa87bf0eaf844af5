// src/export.rs

//! CSV export of listing sets.
//!
//! Fixed column order expected by downstream consumers:
//! `id, listing_name, price, address, apart_size, link`.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::models::Listing;

const HEADER: [&str; 6] = ["id", "listing_name", "price", "address", "apart_size", "link"];

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Write a single CSV row to any writer.
fn write_row<W: Write>(mut w: W, row: &[&str]) -> io::Result<()> {
    let mut first = true;
    for cell in row {
        if !first {
            write!(w, ",")?;
        } else {
            first = false;
        }
        if needs_quotes(cell) {
            let escaped = cell.replace('"', "\"\"");
            write!(w, "\"{escaped}\"")?;
        } else {
            write!(w, "{cell}")?;
        }
    }
    writeln!(w)
}

fn listing_row(listing: &Listing) -> [&str; 6] {
    [
        listing.external_id.as_deref().unwrap_or(""),
        &listing.name,
        listing.price.as_deref().unwrap_or(""),
        listing.address.as_deref().unwrap_or(""),
        listing.size.as_deref().unwrap_or(""),
        &listing.link,
    ]
}

/// Serialize listings as a CSV string, header included.
pub fn to_csv_string(listings: &[Listing]) -> String {
    let mut buf: Vec<u8> = Vec::new();
    let _ = write_row(&mut buf, &HEADER);
    for listing in listings {
        let _ = write_row(&mut buf, &listing_row(listing));
    }
    String::from_utf8(buf).unwrap_or_default()
}

/// Write listings to a CSV file.
pub fn write_csv(listings: &[Listing], out_path: &Path) -> Result<()> {
    let file = File::create(out_path)?;
    let mut writer = BufWriter::new(file);

    write_row(&mut writer, &HEADER)?;
    for listing in listings {
        write_row(&mut writer, &listing_row(listing))?;
    }
    writer.flush()?;

    log::info!("Wrote {} listings to {}", listings.len(), out_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(name: &str, address: Option<&str>) -> Listing {
        Listing {
            link: "https://example.com/d/1".to_string(),
            external_id: Some("1".to_string()),
            name: name.to_string(),
            price: Some("€ 900".to_string()),
            address: address.map(String::from),
            size: None,
        }
    }

    #[test]
    fn test_header_and_column_order() {
        let csv = to_csv_string(&[listing("Wohnung", None)]);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "id,listing_name,price,address,apart_size,link"
        );
        assert_eq!(
            lines.next().unwrap(),
            "1,Wohnung,€ 900,,,https://example.com/d/1"
        );
    }

    #[test]
    fn test_fields_with_commas_are_quoted() {
        let csv = to_csv_string(&[listing("Wohnung", Some("1190 Wien, 19. Bezirk"))]);
        assert!(csv.contains("\"1190 Wien, 19. Bezirk\""));
    }

    #[test]
    fn test_quotes_are_doubled() {
        let csv = to_csv_string(&[listing(r#"Altbau "Jugendstil""#, None)]);
        assert!(csv.contains(r#""Altbau ""Jugendstil""""#));
    }

    #[test]
    fn test_write_csv_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.csv");

        write_csv(&[listing("Wohnung", None)], &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("id,listing_name"));
        assert_eq!(content.lines().count(), 2);
    }
}
