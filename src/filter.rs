use crate::metadata::AttributeSet;
use crate::slug::{self, NumericRange, Segment, PAGE_SEGMENT, SORT_SEGMENT};
use catalogue_types::attribute::AttributeVariant;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Newest => "newest",
            SortKey::PriceAsc => "price_asc",
            SortKey::PriceDesc => "price_desc",
        }
    }

    pub fn from_str(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "newest" => Some(SortKey::Newest),
            "price_asc" => Some(SortKey::PriceAsc),
            "price_desc" => Some(SortKey::PriceDesc),
            _ => None,
        }
    }
}

/// Values chosen for one attribute, OR-ed together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    Options(BTreeSet<String>),
    Ranges(BTreeSet<NumericRange>),
}

impl Selection {
    fn values(&self) -> Vec<String> {
        match self {
            Selection::Options(options) => options.iter().cloned().collect(),
            Selection::Ranges(ranges) => ranges.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Parsed filter path. Built from ordered collections only, so the order of
/// the path segments cannot change it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterSet {
    selections: BTreeMap<String, Selection>,
    page: Option<u32>,
    sort: Option<SortKey>,
}

impl FilterSet {
    pub fn selections(&self) -> &BTreeMap<String, Selection> {
        &self.selections
    }

    pub fn selection(&self, attribute: &str) -> Option<&Selection> {
        self.selections.get(attribute)
    }

    pub fn is_selected(&self, attribute: &str, value: &str) -> bool {
        match self.selections.get(attribute) {
            Some(Selection::Options(options)) => options.contains(value),
            Some(Selection::Ranges(ranges)) => {
                NumericRange::parse(value).is_some_and(|r| ranges.contains(&r))
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    /// 1-indexed
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1)
    }

    pub fn sort(&self) -> SortKey {
        self.sort.unwrap_or_default()
    }

    pub fn select_option<A: Into<String>, O: Into<String>>(&mut self, attribute: A, option: O) {
        match self
            .selections
            .entry(attribute.into())
            .or_insert_with(|| Selection::Options(BTreeSet::new()))
        {
            Selection::Options(options) => {
                options.insert(option.into());
            }
            Selection::Ranges(_) => (),
        }
    }

    pub fn select_range<A: Into<String>>(&mut self, attribute: A, range: NumericRange) {
        match self
            .selections
            .entry(attribute.into())
            .or_insert_with(|| Selection::Ranges(BTreeSet::new()))
        {
            Selection::Ranges(ranges) => {
                ranges.insert(range);
            }
            Selection::Options(_) => (),
        }
    }

    pub fn without(&self, attribute: &str) -> FilterSet {
        let mut res = self.clone();
        res.selections.remove(attribute);
        res
    }

    pub fn with_page(&self, page: u32) -> FilterSet {
        let mut res = self.clone();
        res.page = (page > 1).then_some(page);
        res
    }

    /// Adds the value when absent and removes it otherwise; resets pagination.
    pub fn toggled(&self, attribute: &str, value: &str) -> FilterSet {
        let mut res = self.with_page(1);
        let was_selected = self.is_selected(attribute, value);
        match res.selections.get_mut(attribute) {
            Some(Selection::Options(options)) if was_selected => {
                options.remove(value);
            }
            Some(Selection::Ranges(ranges)) if was_selected => {
                if let Some(range) = NumericRange::parse(value) {
                    ranges.remove(&range);
                }
            }
            _ => match NumericRange::parse(value) {
                Some(range) if matches!(res.selection(attribute), Some(Selection::Ranges(_))) => {
                    res.select_range(attribute, range)
                }
                _ => res.select_option(attribute, value),
            },
        }
        let emptied = match res.selections.get(attribute) {
            Some(Selection::Options(o)) => o.is_empty(),
            Some(Selection::Ranges(r)) => r.is_empty(),
            None => false,
        };
        if emptied {
            res.selections.remove(attribute);
        }
        res
    }

    /// Canonical URL path: attributes and values in sorted order, default
    /// sort and first page omitted.
    pub fn to_path(&self, rubric_slug: &str) -> String {
        let mut path = format!("/{rubric_slug}");
        for (attribute, selection) in &self.selections {
            for value in selection.values() {
                path.push('/');
                path.push_str(&slug::encode(attribute, &value));
            }
        }
        if let Some(sort) = self.sort.filter(|s| *s != SortKey::default()) {
            path.push('/');
            path.push_str(&slug::encode(SORT_SEGMENT, sort.as_str()));
        }
        if let Some(page) = self.page.filter(|p| *p > 1) {
            path.push('/');
            path.push_str(&slug::encode(PAGE_SEGMENT, &page.to_string()));
        }
        path
    }
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    Malformed,
    UnknownAttribute,
    UnknownOption,
    MalformedRange,
    NotFilterable,
    MalformedPage,
    UnknownSort,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct IgnoredSegment {
    pub segment: String,
    pub reason: IgnoreReason,
}

/// Parse result; dropped segments are kept for logging and the response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedFilters {
    pub filters: FilterSet,
    pub ignored: Vec<IgnoredSegment>,
}

pub fn parse<I, S>(segments: I, attributes: &AttributeSet) -> ParsedFilters
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut res = ParsedFilters::default();
    for raw in segments {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            continue;
        }
        if let Err(reason) = apply_segment(&mut res.filters, raw, attributes) {
            log::debug!("Ignoring filter segment {raw}: {reason:?}");
            res.ignored.push(IgnoredSegment {
                segment: raw.to_string(),
                reason,
            });
        }
    }
    res
}

fn apply_segment(
    filters: &mut FilterSet,
    raw: &str,
    attributes: &AttributeSet,
) -> Result<(), IgnoreReason> {
    let (attribute, value) = match slug::decode(raw) {
        Segment::Filter { attribute, value } => (attribute, value),
        Segment::Unrecognized(_) => return Err(IgnoreReason::Malformed),
    };
    match attribute.as_str() {
        PAGE_SEGMENT => {
            let page = value
                .parse::<u32>()
                .ok()
                .filter(|p| *p >= 1)
                .ok_or(IgnoreReason::MalformedPage)?;
            filters.page = Some(filters.page.map_or(page, |p| p.min(page)));
            Ok(())
        }
        SORT_SEGMENT => {
            let sort = SortKey::from_str(&value).ok_or(IgnoreReason::UnknownSort)?;
            filters.sort = Some(filters.sort.map_or(sort, |s| s.min(sort)));
            Ok(())
        }
        _ => {
            let known = attributes
                .get(&attribute)
                .ok_or(IgnoreReason::UnknownAttribute)?;
            if !known.is_filterable() {
                return Err(IgnoreReason::NotFilterable);
            }
            match known.attribute.variant {
                AttributeVariant::Text => Err(IgnoreReason::NotFilterable),
                AttributeVariant::Number => {
                    let range = NumericRange::parse(&value).ok_or(IgnoreReason::MalformedRange)?;
                    filters.select_range(attribute, range);
                    Ok(())
                }
                AttributeVariant::Select | AttributeVariant::MultipleSelect => {
                    if known.tree.find_by_slug(&value).is_none() {
                        return Err(IgnoreReason::UnknownOption);
                    }
                    filters.select_option(attribute, value);
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::wine_attributes;
    use rust_decimal_macros::dec;

    #[test]
    fn accumulates_within_attribute_and_splits_pseudo_segments() {
        let attributes = wine_attributes();
        let parsed = parse(
            [
                "grape-merlot",
                "region-bordeaux",
                "grape-cabernet",
                "page-3",
                "sort-price_desc",
                "price-1000_2000",
            ],
            &attributes,
        );
        assert!(parsed.ignored.is_empty());
        let f = parsed.filters;
        assert_eq!(
            f.selection("grape"),
            Some(&Selection::Options(
                ["cabernet", "merlot"].into_iter().map(String::from).collect()
            ))
        );
        assert!(f.is_selected("region", "bordeaux"));
        assert!(f.is_selected("price", "1000_2000"));
        assert_eq!(f.page(), 3);
        assert_eq!(f.sort(), SortKey::PriceDesc);
        assert!(!f.selections().contains_key("page"));
    }

    #[test]
    fn drops_unknown_and_malformed_segments() {
        let attributes = wine_attributes();
        let parsed = parse(
            [
                "foo-bar",
                "grape-zinfandel",
                "price-2000_1000",
                "abv-x_y",
                "price-1_2_3",
                "tasting_note-dry",
                "page-0",
                "sort-rating",
                "nonsense",
                "grape-merlot",
            ],
            &attributes,
        );
        let reasons: Vec<_> = parsed.ignored.iter().map(|i| i.reason).collect();
        assert_eq!(
            reasons,
            vec![
                IgnoreReason::UnknownAttribute,
                IgnoreReason::UnknownOption,
                IgnoreReason::MalformedRange,
                IgnoreReason::MalformedRange,
                IgnoreReason::MalformedRange,
                IgnoreReason::NotFilterable,
                IgnoreReason::MalformedPage,
                IgnoreReason::UnknownSort,
                IgnoreReason::Malformed,
            ]
        );
        assert_eq!(parsed.filters, parse(["grape-merlot"], &attributes).filters);
        assert!(parsed.filters.selection("price").is_none());
    }

    #[test]
    fn segment_order_does_not_matter() {
        let attributes = wine_attributes();
        let segments = [
            "grape-merlot",
            "region-bordeaux",
            "price-1000_2000",
            "grape-cabernet",
            "price-3000_4000",
            "page-2",
            "page-5",
            "sort-price_asc",
            "sort-newest",
        ];
        let expected = parse(segments, &attributes).filters;
        let mut reversed = segments;
        reversed.reverse();
        assert_eq!(parse(reversed, &attributes).filters, expected);
        let mut rotated = segments;
        rotated.rotate_left(4);
        assert_eq!(parse(rotated, &attributes).filters, expected);
        assert_eq!(expected.page(), 2);
        assert_eq!(expected.sort(), SortKey::Newest);
    }

    #[test]
    fn canonical_path_is_sorted() {
        let attributes = wine_attributes();
        let f = parse(
            ["region-bordeaux", "page-2", "grape-merlot", "sort-price_asc", "grape-cabernet"],
            &attributes,
        )
        .filters;
        assert_eq!(
            f.to_path("wine"),
            "/wine/grape-cabernet/grape-merlot/region-bordeaux/sort-price_asc/page-2"
        );
        assert_eq!(FilterSet::default().to_path("wine"), "/wine");
    }

    #[test]
    fn toggling_adds_and_removes() {
        let mut f = FilterSet::default().with_page(4);
        f.select_option("grape", "merlot");
        let added = f.toggled("grape", "cabernet");
        assert!(added.is_selected("grape", "cabernet"));
        assert_eq!(added.page(), 1);
        let removed = f.toggled("grape", "merlot");
        assert!(removed.selection("grape").is_none());

        let range = NumericRange::new(dec!(1000), dec!(2000)).unwrap();
        let mut p = FilterSet::default();
        p.select_range("price", range);
        assert!(p.toggled("price", "1000_2000").is_empty());
        assert!(p.toggled("price", "3000_4000").is_selected("price", "3000_4000"));
    }
}
