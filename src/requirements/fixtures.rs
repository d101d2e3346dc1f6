//! Entity shapes exercised by the requirements.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::marshal::{BaseEntity, ChildLink, ChildRecord, Children, TimeSeriesInput};
use crate::values::{
    Amount, Email, ExternalId, Id, IntSet, Interval, KeyMixed, MinMax, Mixed, PersonName, Phone,
    SecureString, StringSet, Translations, VerifyString,
};
use crate::{Entity, Properties};

#[derive(Debug, Clone, PartialEq, Default, Properties)]
pub struct Extended {
    #[property("unique_id,unique")]
    pub unique_id: String,
    pub nickname: String,
}

#[derive(Debug, Clone, PartialEq, Default, Entity)]
pub struct Person {
    #[entity(base)]
    pub base: BaseEntity,
    #[property("name,lookup")]
    pub name: String,
    pub height_in_cm: i64,
    #[property("dob")]
    pub date_of_birth: DateTime<Utc>,
    pub bank_balance: Amount,
    #[property("full_name,secure")]
    pub full_name: SecureString,
    #[property("account_pin,verify")]
    pub account_pin: VerifyString,
    #[property("secret_answer,secure")]
    pub secret_answer: SecureString,
    #[property("extended,omitempty")]
    pub extended: Option<Extended>,
    #[property("-")]
    pub scratch: String,
}

#[derive(Debug, Clone, PartialEq, Default, Properties)]
pub struct Role {
    pub title: String,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Default, Properties)]
pub struct Executive {
    pub name: String,
    pub current_role: Role,
}

#[derive(Debug, Clone, PartialEq, Default, Entity)]
pub struct Company {
    #[entity(base)]
    pub base: BaseEntity,
    #[property("name,lookup")]
    pub name: String,
    pub ceo: Executive,
    pub founded: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Default, Entity)]
#[entity(immutable)]
pub struct Transaction {
    #[entity(base)]
    pub base: BaseEntity,
    pub amount: Amount,
    #[property("id,unique")]
    pub reference: String,
    pub payment_type: String,
}

#[derive(Debug, Clone, PartialEq, Default, Entity)]
pub struct WithPrimary {
    #[entity(base)]
    pub base: BaseEntity,
    pub first_name: String,
    pub last_name: String,
    #[property("name_hash,primary")]
    pub name_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Entity)]
pub struct DataTypes {
    #[entity(base)]
    pub base: BaseEntity,
    pub integer_set: IntSet,
    pub string_set: StringSet,
    pub mixed_key: KeyMixed,
    pub mixed: Mixed,
    pub period: Interval,
    pub payload: Vec<u8>,
    pub enabled: bool,
    pub ratio: f64,
    pub range: MinMax,
    pub external: ExternalId,
    pub titles: Translations,
    pub contact_name: PersonName,
    pub email: Email,
    pub phone: Phone,
    pub attributes: BTreeMap<String, String>,
    pub aliases: Vec<String>,
    pub owner: Id<Person>,
}

#[derive(Debug, Clone, PartialEq, Default, Properties)]
pub struct OrderLine {
    pub sku: String,
    pub quantity: i64,
    pub unit_price: Amount,
}

impl ChildRecord for OrderLine {
    fn child_id(&self) -> String {
        self.sku.clone()
    }

    fn aggregate(&self) -> Option<f64> {
        Some((self.quantity * self.unit_price.units) as f64)
    }

    fn has_aggregate() -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Default, Entity)]
pub struct Order {
    #[entity(base)]
    pub base: BaseEntity,
    #[property("number,unique")]
    pub number: String,
    #[property("lines,child")]
    pub lines: Children<OrderLine>,
}

#[derive(Debug, Clone, PartialEq, Default, Entity)]
pub struct Subscription {
    #[entity(base)]
    pub base: BaseEntity,
    pub plan: String,
    #[property("_count_descendant:fixtures.renewal")]
    pub number_of_renewals: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Entity)]
pub struct Renewal {
    #[entity(base)]
    pub base: BaseEntity,
    #[entity(child)]
    pub link: ChildLink,
    #[property("sequence,indexed")]
    pub sequence: i64,
    pub price: Amount,
}

#[derive(Debug, Clone, PartialEq, Default, Entity)]
pub struct Contact {
    #[entity(base)]
    pub base: BaseEntity,
    #[property("name,lookup")]
    pub name: String,
    #[property("city,indexed")]
    pub city: String,
    pub age: i64,
    #[property("_count_relation:friend")]
    pub friends: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Entity)]
#[entity(store_mutations)]
pub struct Contract {
    #[entity(base)]
    pub base: BaseEntity,
    pub title: String,
    pub term: Interval,
}

#[derive(Debug, Clone, PartialEq, Default, Entity)]
#[entity(hashed_id)]
pub struct Account {
    #[entity(base)]
    pub base: BaseEntity,
    pub handle: String,
    pub balance: Amount,
}

#[derive(Debug, Clone, PartialEq, Default, Entity)]
pub struct Reading {
    #[entity(base)]
    pub base: BaseEntity,
    #[entity(time_series)]
    pub at: TimeSeriesInput,
    #[property("sensor,metricfilter")]
    pub sensor: String,
    #[property("celsius,metric")]
    pub celsius: f64,
    #[property("note,nosnapshot")]
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Default, Entity)]
pub struct Patient {
    #[entity(base)]
    pub base: BaseEntity,
    #[property("reference,unique")]
    pub reference: String,
    #[property("name,pii")]
    pub name: String,
    #[property("phone,pii")]
    pub phone: Phone,
    pub ward: String,
}
