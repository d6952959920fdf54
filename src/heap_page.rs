//! Slotted heap pages: a slot-occupancy bitmap header followed by
//! fixed-size tuple slots.

use std::sync::Arc;

use crate::errors::{Error, Result};
use crate::transaction::TransactionId;
use crate::tuple::{RecordId, Schema, Tuple};
use crate::{page_size, PageId};

/// In-memory form of one on-disk page. Parsed on read, serialized back on
/// flush. Carries the dirty marker and the before-image the WAL needs.
#[derive(Debug, Clone)]
pub struct HeapPage {
    pid: PageId,
    schema: Arc<Schema>,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    dirtier: Option<TransactionId>,
    before_image: Vec<u8>,
}

impl HeapPage {
    /// Number of tuple slots a page of the current page size holds:
    /// each slot costs `tuple_size` bytes plus one header bit.
    pub fn slots_per_page(schema: &Schema) -> usize {
        (page_size() * 8) / (schema.tuple_size() * 8 + 1)
    }

    fn header_len(slots: usize) -> usize {
        slots.div_ceil(8)
    }

    /// A zeroed page image: no slot occupied.
    pub fn empty_page_data() -> Vec<u8> {
        vec![0; page_size()]
    }

    /// Parses a raw page image. Occupied slots get their tuples decoded
    /// and record ids assigned; the raw bytes become the before-image.
    pub fn parse(pid: PageId, schema: Arc<Schema>, data: &[u8]) -> Result<Self> {
        if data.len() != page_size() {
            return Err(Error::Schema(format!(
                "page image is {} bytes, expected {}",
                data.len(),
                page_size()
            )));
        }
        let slots = Self::slots_per_page(&schema);
        let header_len = Self::header_len(slots);
        let header = data[..header_len].to_vec();
        let tuple_size = schema.tuple_size();

        let mut tuples = Vec::with_capacity(slots);
        for slot in 0..slots {
            if (header[slot / 8] >> (slot % 8)) & 1 == 1 {
                let offset = header_len + slot * tuple_size;
                let mut tuple = Tuple::read_from(schema.clone(), &data[offset..offset + tuple_size])?;
                tuple.set_rid(Some(RecordId::new(pid, slot)));
                tuples.push(Some(tuple));
            } else {
                tuples.push(None);
            }
        }

        Ok(Self {
            pid,
            schema,
            header,
            tuples,
            dirtier: None,
            before_image: data.to_vec(),
        })
    }

    /// Serializes the page back into an on-disk image. Free slots and the
    /// tail padding are zeroed, so a fresh page round-trips to
    /// [`HeapPage::empty_page_data`].
    pub fn page_data(&self) -> Vec<u8> {
        let mut data = vec![0; page_size()];
        let header_len = self.header.len();
        data[..header_len].copy_from_slice(&self.header);
        let tuple_size = self.schema.tuple_size();
        for (slot, tuple) in self.tuples.iter().enumerate() {
            if let Some(tuple) = tuple {
                let offset = header_len + slot * tuple_size;
                tuple.write_to(&mut data[offset..offset + tuple_size]);
            }
        }
        data
    }

    pub fn id(&self) -> PageId {
        self.pid
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The transaction that dirtied this page, if any.
    pub fn dirtier(&self) -> Option<TransactionId> {
        self.dirtier
    }

    pub fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirtier = tid;
    }

    /// The page image at transaction begin / last commit, used for WAL
    /// undo records.
    pub fn before_image(&self) -> &[u8] {
        &self.before_image
    }

    /// Snapshots the current content as the new before-image baseline.
    pub fn set_before_image(&mut self) {
        self.before_image = self.page_data();
    }

    pub fn num_free_slots(&self) -> usize {
        self.tuples.iter().filter(|t| t.is_none()).count()
    }

    pub fn slot_used(&self, slot: usize) -> bool {
        self.tuples.get(slot).is_some_and(|t| t.is_some())
    }

    /// Stores `tuple` in the first free slot and assigns its record id.
    pub fn insert_tuple(&mut self, mut tuple: Tuple) -> Result<RecordId> {
        if tuple.schema() != &self.schema {
            return Err(Error::Schema("tuple schema does not match page".into()));
        }
        let slot = self
            .tuples
            .iter()
            .position(|t| t.is_none())
            .ok_or(Error::PageFull(self.pid))?;
        let rid = RecordId::new(self.pid, slot);
        tuple.set_rid(Some(rid));
        self.header[slot / 8] |= 1 << (slot % 8);
        self.tuples[slot] = Some(tuple);
        Ok(rid)
    }

    /// Clears the slot named by the tuple's record id, which must refer
    /// to this page and be occupied.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> Result<()> {
        let rid = tuple.rid().ok_or(Error::MissingRecordId)?;
        if rid.pid != self.pid || !self.slot_used(rid.slot) {
            return Err(Error::NoSuchTuple(rid));
        }
        self.header[rid.slot / 8] &= !(1 << (rid.slot % 8));
        self.tuples[rid.slot] = None;
        Ok(())
    }

    /// Iterates the stored tuples in slot order, skipping free slots.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter().filter_map(|t| t.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{Column, Field, FieldType};

    fn two_int_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Column::new("a", FieldType::Int),
            Column::new("b", FieldType::Int),
        ]))
    }

    fn pair(schema: &Arc<Schema>, a: i32, b: i32) -> Tuple {
        Tuple::new(schema.clone(), vec![Field::Int(a), Field::Int(b)]).unwrap()
    }

    fn empty_page(schema: &Arc<Schema>) -> HeapPage {
        let pid = PageId::new(7, 0);
        HeapPage::parse(pid, schema.clone(), &HeapPage::empty_page_data()).unwrap()
    }

    #[test]
    fn fresh_page_has_full_slot_capacity() {
        let schema = two_int_schema();
        let page = empty_page(&schema);
        // 4096 * 8 bits / (8 bytes * 8 bits + 1 occupancy bit)
        assert_eq!(HeapPage::slots_per_page(&schema), 504);
        assert_eq!(page.num_free_slots(), 504);
    }

    #[test]
    fn insert_assigns_record_id_and_consumes_a_slot() {
        let schema = two_int_schema();
        let mut page = empty_page(&schema);
        let free = page.num_free_slots();

        let rid = page.insert_tuple(pair(&schema, 1, 2)).unwrap();
        assert_eq!(rid.pid, page.id());
        assert_eq!(rid.slot, 0);
        assert!(page.slot_used(0));
        assert_eq!(page.num_free_slots(), free - 1);
    }

    #[test]
    fn full_page_rejects_inserts() {
        let schema = two_int_schema();
        let mut page = empty_page(&schema);
        for i in 0..HeapPage::slots_per_page(&schema) {
            page.insert_tuple(pair(&schema, i as i32, 0)).unwrap();
        }
        assert_eq!(page.num_free_slots(), 0);
        assert!(matches!(
            page.insert_tuple(pair(&schema, -1, -1)),
            Err(Error::PageFull(_))
        ));
    }

    #[test]
    fn delete_requires_a_matching_occupied_slot() {
        let schema = two_int_schema();
        let mut page = empty_page(&schema);
        page.insert_tuple(pair(&schema, 1, 2)).unwrap();

        // No record id at all.
        let loose = pair(&schema, 1, 2);
        assert!(matches!(
            page.delete_tuple(&loose),
            Err(Error::MissingRecordId)
        ));

        // Record id pointing at another page.
        let mut foreign = pair(&schema, 1, 2);
        foreign.set_rid(Some(RecordId::new(PageId::new(99, 3), 0)));
        assert!(matches!(
            page.delete_tuple(&foreign),
            Err(Error::NoSuchTuple(_))
        ));

        // Record id pointing at a free slot.
        let mut hole = pair(&schema, 1, 2);
        hole.set_rid(Some(RecordId::new(page.id(), 5)));
        assert!(matches!(page.delete_tuple(&hole), Err(Error::NoSuchTuple(_))));
    }

    #[test]
    fn iterator_skips_freed_slots() {
        let schema = two_int_schema();
        let mut page = empty_page(&schema);
        page.insert_tuple(pair(&schema, 0, 0)).unwrap();
        let mut middle = pair(&schema, 1, 1);
        let rid = page.insert_tuple(middle.clone()).unwrap();
        middle.set_rid(Some(rid));
        page.insert_tuple(pair(&schema, 2, 2)).unwrap();

        page.delete_tuple(&middle).unwrap();
        let seen: Vec<i32> = page
            .iter()
            .map(|t| match t.field(0) {
                Field::Int(v) => *v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(seen, vec![0, 2]);
    }

    #[test]
    fn page_round_trips_through_bytes() {
        let schema = two_int_schema();
        let mut page = empty_page(&schema);
        page.insert_tuple(pair(&schema, 10, 20)).unwrap();
        page.insert_tuple(pair(&schema, 30, 40)).unwrap();

        let data = page.page_data();
        assert_eq!(data.len(), page_size());
        let back = HeapPage::parse(page.id(), schema, &data).unwrap();
        assert_eq!(back.num_free_slots(), page.num_free_slots());
        let values: Vec<(i32, i32)> = back
            .iter()
            .map(|t| match (t.field(0), t.field(1)) {
                (Field::Int(a), Field::Int(b)) => (*a, *b),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(values, vec![(10, 20), (30, 40)]);
    }

    #[test]
    fn before_image_tracks_commit_boundaries() {
        let schema = two_int_schema();
        let mut page = empty_page(&schema);
        let clean = page.before_image().to_vec();

        page.insert_tuple(pair(&schema, 5, 6)).unwrap();
        assert_eq!(page.before_image(), &clean[..]);

        page.set_before_image();
        assert_eq!(page.before_image(), &page.page_data()[..]);
    }

    #[test]
    fn mismatched_schema_is_rejected() {
        let schema = two_int_schema();
        let other = Arc::new(Schema::new(vec![Column::new("s", FieldType::Str)]));
        let mut page = empty_page(&schema);
        let tuple = Tuple::new(other, vec![Field::Str("x".into())]).unwrap();
        assert!(matches!(page.insert_tuple(tuple), Err(Error::Schema(_))));
    }
}
