use rusqlite::OptionalExtension;

use crate::{
    lbdb::{DBResult, Store, bad_column},
    models::{self, HomeworkKind, LessonId},
};

/////*============== LESSON QUERIES ==============*/
impl<'a> TryFrom<&'a rusqlite::Row<'a>> for models::Lesson {
    type Error = rusqlite::Error;

    fn try_from(row: &rusqlite::Row) -> Result<Self, rusqlite::Error> {
        let homework = match row.get::<_, Option<String>>("homework_type")? {
            Some(kind) if row.get::<_, bool>("has_homework")? => Some(
                HomeworkKind::parse(&kind)
                    .ok_or_else(|| bad_column(row.as_ref().column_index("homework_type").unwrap_or(0), &kind))?,
            ),
            _ => None,
        };

        Ok(Self {
            id: row.get("lesson_id")?,
            order: row.get("order_num")?,
            title: row.get("title")?,
            body: row.get("body")?,
            media_url: row.get("media_url")?,
            homework,
        })
    }
}

impl Store {
    pub fn query_lesson(&self, lesson_id: LessonId) -> DBResult<Option<models::Lesson>> {
        let connection = self.connect()?;

        connection
            .query_row(
                "SELECT * FROM Lessons WHERE lesson_id = :lesson_id",
                rusqlite::named_params! { ":lesson_id": lesson_id },
                |row| models::Lesson::try_from(row),
            )
            .optional()
    }

    pub fn query_lesson_by_order(&self, order: u32) -> DBResult<Option<models::Lesson>> {
        let connection = self.connect()?;

        connection
            .query_row(
                "SELECT * FROM Lessons WHERE order_num = :order",
                rusqlite::named_params! { ":order": order },
                |row| models::Lesson::try_from(row),
            )
            .optional()
    }

    /// The whole catalog, in course order.
    pub fn query_lessons(&self) -> DBResult<Vec<models::Lesson>> {
        let connection = self.connect()?;

        let mut stmt = connection.prepare("SELECT * FROM Lessons ORDER BY order_num")?;
        let lessons = stmt
            .query_map([], |row| models::Lesson::try_from(row))?
            .collect::<DBResult<Vec<models::Lesson>>>()?;

        Ok(lessons)
    }

    pub fn count_lessons(&self) -> DBResult<u64> {
        self.connect()?
            .query_row("SELECT COUNT(*) FROM Lessons", [], |row| row.get(0))
    }

    /// Inserts a catalog entry, or does nothing if its order position is taken.
    /// Returns `true` if it was newly added, false otherwise.
    pub fn insert_lesson(&self, seed: &models::LessonSeed) -> DBResult<bool> {
        log::trace!("[insert_lesson] Inserting lesson {} ({}) into Lessons...", seed.order, seed.title);
        let connection = self.connect()?;
        let has_homework = seed.homework.is_some();
        let homework_type = seed.homework.map(|kind| kind.as_str());

        let query_params = rusqlite::named_params! {
            ":order_num":     seed.order,
            ":title":         seed.title,
            ":body":          seed.body,
            ":media_url":     seed.media_url,
            ":has_homework":  has_homework,
            ":homework_type": homework_type,
        };

        connection
            .prepare(
                "INSERT INTO Lessons ( order_num,  title,  body,  media_url,  has_homework,  homework_type)
                 VALUES              (:order_num, :title, :body, :media_url, :has_homework, :homework_type)",
            )?
            .execute(query_params)
            .map_or_else(crate::lbdb::swallow_constraint_violation, |_| Ok(true))
    }

    /// Seeds the catalog from `seeds`, keeping whatever is already stored.
    /// Returns how many lessons were added.
    pub fn seed_lessons(&self, seeds: &[models::LessonSeed]) -> DBResult<usize> {
        let mut added = 0;
        for seed in seeds {
            if self.insert_lesson(seed)? {
                added += 1;
            }
        }

        log::info!("Lesson catalog seeded: {added} new, {} total.", self.count_lessons()?);
        Ok(added)
    }
}
