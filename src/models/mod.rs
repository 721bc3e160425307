pub mod audit;
pub mod feedback;
pub mod issue;
pub mod label;
pub mod ticket;
pub mod user;

pub use audit::{AuditAction, AuditLog};
pub use feedback::Feedback;
pub use issue::Issue;
pub use label::{Label, TicketLabel};
pub use ticket::{Ticket, TicketStatus};
pub use user::User;

/// `YYYY-MM-DD` serde format for `time::Date`.
pub mod iso_date {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::{macros::format_description, Date};

    pub fn serialize<S: Serializer>(date: &Date, s: S) -> Result<S::Ok, S::Error> {
        let out = date
            .format(format_description!("[year]-[month]-[day]"))
            .map_err(serde::ser::Error::custom)?;
        s.serialize_str(&out)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Date, D::Error> {
        let raw = String::deserialize(d)?;
        Date::parse(&raw, format_description!("[year]-[month]-[day]"))
            .map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use time::Date;

        pub fn serialize<S: Serializer>(date: &Option<Date>, s: S) -> Result<S::Ok, S::Error> {
            match date {
                Some(d) => super::serialize(d, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Date>, D::Error> {
            match Option::<String>::deserialize(d)? {
                Some(raw) if !raw.trim().is_empty() => Date::parse(
                    raw.trim(),
                    time::macros::format_description!("[year]-[month]-[day]"),
                )
                .map(Some)
                .map_err(serde::de::Error::custom),
                _ => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use time::macros::date;

    #[derive(Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "super::iso_date::option", default)]
        birthdate: Option<time::Date>,
    }

    #[test]
    fn iso_date_accepts_blank_and_formats_plain_dates() {
        let h: Holder = serde_json::from_str(r#"{"birthdate":"1990-04-02"}"#).unwrap();
        assert_eq!(h.birthdate, Some(date!(1990 - 04 - 02)));
        assert_eq!(
            serde_json::to_string(&h).unwrap(),
            r#"{"birthdate":"1990-04-02"}"#
        );

        let blank: Holder = serde_json::from_str(r#"{"birthdate":""}"#).unwrap();
        assert!(blank.birthdate.is_none());
        let missing: Holder = serde_json::from_str("{}").unwrap();
        assert!(missing.birthdate.is_none());
    }
}
