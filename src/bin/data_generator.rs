//! Writes a synthetic household panel CSV.
//!
//! Usage: `data_generator [PATH] [HOUSEHOLDS]`

use rand::Rng;
use std::fs::File;
use std::io::{BufWriter, Write};
use tracing::info;
use tracing_subscriber::EnvFilter;

const STATES: [(&str, &[&str]); 4] = [
    ("Bihar", &["Patna", "Gaya", "Muzaffarpur", "Bhagalpur"]),
    ("Uttar Pradesh", &["Lucknow", "Varanasi", "Agra", "Gorakhpur", "Kanpur"]),
    ("Maharashtra", &["Pune", "Nagpur", "Nashik"]),
    ("Tamil Nadu", &["Chennai", "Madurai", "Salem", "Coimbatore"]),
];

const CASTES: [(&str, &str); 8] = [
    ("Yadav", "OBC"),
    ("Kurmi", "OBC"),
    ("Brahmin", "Upper Caste"),
    ("Rajput", "Upper Caste"),
    ("Chamar", "SC"),
    ("Mahar", "SC"),
    ("Gond", "ST"),
    ("Vanniyar", "OBC"),
];

const YEARS: std::ops::RangeInclusive<i32> = 2019..=2022;
const WAVE_MONTHS: [u32; 3] = [1, 5, 9];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "data/panel.csv".to_string());
    let households: u64 = match args.next() {
        Some(raw) => raw.parse()?,
        None => 100_000,
    };

    let file = File::create(&path)?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "hh_id,state,district,date_year,date_month,caste,caste_category")?;

    let mut rng = rand::rng();
    let mut rows = 0u64;
    for hh in 0..households {
        let (state, districts) = STATES[rng.random_range(0..STATES.len())];
        let district = districts[rng.random_range(0..districts.len())];
        let (caste, category) = CASTES[rng.random_range(0..CASTES.len())];
        for year in YEARS {
            for month in WAVE_MONTHS {
                // Households miss some interview waves.
                if rng.random_bool(0.85) {
                    writeln!(
                        writer,
                        "HH{hh:08},{state},{district},{year},{month},{caste},{category}"
                    )?;
                    rows += 1;
                }
            }
        }
    }
    writer.flush()?;

    info!(path, households, rows, "panel CSV generated");
    Ok(())
}
