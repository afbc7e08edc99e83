use rusqlite::{Connection, OptionalExtension};

/// Tables whose rows carry a unique `slug` column.
#[derive(Debug, Clone, Copy)]
pub enum SlugTable {
    Units,
    Exercises,
    Evaluations,
}

impl SlugTable {
    fn name(self) -> &'static str {
        match self {
            SlugTable::Units => "units",
            SlugTable::Exercises => "exercises",
            SlugTable::Evaluations => "evaluations",
        }
    }
}

/// Lowercase ASCII slug: Spanish accents folded, runs of anything else
/// collapsed into a single `-`.
pub fn slugify(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars().flat_map(|c| c.to_lowercase()) {
        let folded = match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            'ç' => 'c',
            other => other,
        };
        if folded.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(folded);
        } else {
            pending_dash = true;
        }
    }
    if out.is_empty() {
        "item".to_string()
    } else {
        out
    }
}

/// `slugify(title)`, suffixed with `-2`, `-3`, ... until no other row of
/// `table` uses it. `exclude_id` is the row being renamed, if any.
pub fn unique_slug(
    conn: &Connection,
    table: SlugTable,
    title: &str,
    exclude_id: Option<&str>,
) -> rusqlite::Result<String> {
    let base = slugify(title);
    let sql = format!(
        "SELECT 1 FROM {} WHERE slug = ? AND id <> ? LIMIT 1",
        table.name()
    );
    let exclude = exclude_id.unwrap_or("");
    let mut candidate = base.clone();
    let mut n = 2;
    loop {
        let taken: Option<i64> = conn
            .query_row(&sql, (&candidate, exclude), |r| r.get(0))
            .optional()?;
        if taken.is_none() {
            return Ok(candidate);
        }
        candidate = format!("{}-{}", base, n);
        n += 1;
    }
}
