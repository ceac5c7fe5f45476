use rusqlite::OptionalExtension;

use crate::{
    lbdb::{DBResult, Store},
    models::{self, UserId},
    state::UserState,
};

/////*============== USER QUERIES ==============*/
impl<'a> TryFrom<&'a rusqlite::Row<'a>> for models::User {
    type Error = rusqlite::Error;

    fn try_from(row: &rusqlite::Row) -> Result<Self, rusqlite::Error> {
        let tag: String = row.get("state")?;
        let state = tag.parse::<UserState>().unwrap_or_else(|err| {
            log::warn!("[User::try_from] {err}, treating the user as unauthenticated");
            UserState::NoAuth
        });

        Ok(Self {
            id: row.get("user_id")?,
            display_name: row.get("display_name")?,
            state,
            last_activity: models::from_nanos(row.get("last_activity")?),
            created_at: models::from_nanos(row.get("created_at")?),
        })
    }
}

impl Store {
    /// Returns the user with the id `user_id`, if they exist.
    pub fn query_user(&self, user_id: UserId) -> DBResult<Option<models::User>> {
        let connection = self.connect()?;

        connection
            .query_row(
                "SELECT * FROM Users WHERE user_id = :user_id",
                rusqlite::named_params! { ":user_id": user_id },
                |row| models::User::try_from(row),
            )
            .optional()
    }

    /// Inserts the user if they aren't known yet.
    /// Returns `true` if it was newly added, false otherwise.
    pub fn insert_user(&self, user_id: UserId, display_name: &str) -> DBResult<bool> {
        log::trace!("[insert_user] Inserting user {user_id} ({display_name}) into Users...");
        let connection = self.connect()?;
        let state = UserState::NoAuth.to_string();
        let now = self.now_nanos();

        let query_params = rusqlite::named_params! {
            ":user_id":      user_id,
            ":display_name": display_name,
            ":state":        state,
            ":now":          now,
        };

        let inserted = connection
            .prepare(
                "INSERT INTO Users ( user_id,  display_name,  state,  last_activity,  created_at)
                 VALUES            (:user_id, :display_name, :state, :now,           :now)
                 ON CONFLICT (user_id) DO NOTHING",
            )?
            .execute(query_params)?;

        if inserted > 0 {
            log::info!("New user {user_id} ({display_name}) has been added to the database.");
        }

        Ok(inserted > 0)
    }

    /// Overwrites the stored state tag. Transition checks happen in the caller.
    pub fn update_user_state(&self, user_id: UserId, state: &UserState) -> DBResult<()> {
        log::trace!("[update_user_state] {user_id} -> {state}");
        let connection = self.connect()?;

        connection
            .prepare("UPDATE Users SET state = :state WHERE user_id = :user_id")?
            .execute(rusqlite::named_params! {
                ":state":   state.to_string(),
                ":user_id": user_id,
            })
            .inspect_err(|err| log::error!("[update_user_state] Error updating {user_id}: {err}"))?;

        Ok(())
    }

    /// Marks inbound activity: bumps `last_activity` and re-arms every reminder tier.
    pub fn record_activity(&self, user_id: UserId) -> DBResult<()> {
        log::trace!("[record_activity] Activity from {user_id}");
        let mut connection = self.connect()?;
        let transaction = Store::write_transaction(&mut connection)?;

        transaction.execute(
            "UPDATE Users SET last_activity = :now WHERE user_id = :user_id",
            rusqlite::named_params! { ":now": self.now_nanos(), ":user_id": user_id },
        )?;
        let cleared = transaction.execute(
            "DELETE FROM Reminders WHERE user_id = :user_id",
            rusqlite::named_params! { ":user_id": user_id },
        )?;

        transaction.commit()?;

        if cleared > 0 {
            log::debug!("[record_activity] {user_id} is back, cleared {cleared} reminder(s)");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::lbdb::testing::*;
    use crate::state::UserState;

    #[test]
    fn inserting_twice_keeps_the_first_row() {
        let test = test_store();
        assert!(test.store.insert_user(7, "Ada").unwrap());
        assert!(!test.store.insert_user(7, "Someone else").unwrap());

        let user = test.store.query_user(7).unwrap().unwrap();
        assert_eq!(user.display_name, "Ada");
        assert_eq!(user.state, UserState::NoAuth);
        assert_eq!(user.created_at, start_time());
    }

    #[test]
    fn activity_moves_last_activity_forward() {
        let test = test_store();
        test.store.insert_user(7, "Ada").unwrap();

        test.clock.advance(chrono::Duration::days(2));
        test.store.record_activity(7).unwrap();

        let user = test.store.query_user(7).unwrap().unwrap();
        assert_eq!(user.last_activity, start_time() + chrono::Duration::days(2));
    }

    #[test]
    fn state_tags_survive_storage() {
        let test = test_store();
        test.store.insert_user(7, "Ada").unwrap();
        test.store.update_user_state(7, &UserState::WaitingHomework { lesson: 3 }).unwrap();

        let user = test.store.query_user(7).unwrap().unwrap();
        assert_eq!(user.state, UserState::WaitingHomework { lesson: 3 });
    }

    #[test]
    fn unknown_users_are_none() {
        let test = test_store();
        assert!(test.store.query_user(404).unwrap().is_none());
    }
}
