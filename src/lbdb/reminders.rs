use crate::{
    lbdb::{DBResult, Store},
    models::{self, ReminderTier, UserId},
};

/////*============== REMINDER QUERIES ==============*/
impl Store {
    /// Enrolled users whose inactivity is at least `threshold` but still under `cutoff`,
    /// and who haven't had `tier` sent in this inactivity episode.
    pub fn query_users_for_reminder(
        &self,
        tier: ReminderTier,
        threshold: chrono::Duration,
        cutoff: chrono::Duration,
    ) -> DBResult<Vec<UserId>> {
        log::trace!("[query_users_for_reminder] Looking for users due a {} reminder...", tier.as_str());
        let connection = self.connect()?;
        let now = self.now_nanos();

        let mut stmt = connection.prepare(
            "SELECT u.user_id
             FROM Users u
             JOIN Enrollments e ON e.user_id = u.user_id
             WHERE u.last_activity <= :now - :threshold
               AND u.last_activity >  :now - :cutoff
               AND NOT EXISTS (
                 SELECT 1 FROM Reminders r
                 WHERE r.user_id = u.user_id AND r.reminder_type = :tier
               )
             ORDER BY u.last_activity",
        )?;

        let users = stmt
            .query_map(
                rusqlite::named_params! {
                    ":now":       now,
                    ":threshold": models::duration_nanos(threshold),
                    ":cutoff":    models::duration_nanos(cutoff),
                    ":tier":      tier.as_str(),
                },
                |row| row.get(0),
            )?
            .collect::<DBResult<Vec<UserId>>>()?;

        Ok(users)
    }

    /// Claims `tier` for `user_id`. Returns `true` only for the caller that logged it first;
    /// that caller is the one allowed to send the reminder.
    pub fn log_reminder(&self, user_id: UserId, tier: ReminderTier) -> DBResult<bool> {
        log::trace!("[log_reminder] Logging {} reminder for {user_id}", tier.as_str());
        let connection = self.connect()?;
        let now = self.now_nanos();

        connection
            .prepare(
                "INSERT INTO Reminders ( user_id,  reminder_type,  sent_at)
                 VALUES                (:user_id, :tier,          :now)",
            )?
            .execute(rusqlite::named_params! { ":user_id": user_id, ":tier": tier.as_str(), ":now": now })
            .map_or_else(crate::lbdb::swallow_constraint_violation, |_| Ok(true))
    }

    /// Tiers already sent to the user since their last activity.
    pub fn query_reminders(&self, user_id: UserId) -> DBResult<Vec<ReminderTier>> {
        let connection = self.connect()?;

        let mut stmt = connection.prepare(
            "SELECT reminder_type FROM Reminders WHERE user_id = :user_id ORDER BY sent_at",
        )?;
        let tiers = stmt
            .query_map(rusqlite::named_params! { ":user_id": user_id }, |row| row.get::<_, String>(0))?
            .collect::<DBResult<Vec<String>>>()?;

        Ok(tiers
            .iter()
            .filter_map(|tag| ReminderTier::ALL.into_iter().find(|tier| tier.as_str() == tag))
            .collect())
    }
}
