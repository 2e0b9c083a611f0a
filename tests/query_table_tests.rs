use rstest::rstest;
use timeshift::{
    Query,
    timeshift::query::{ArgShape, BufferPolicy, Dispatch, QUERY_TABLE, lookup},
};

#[test]
fn table_is_indexed_by_query() {
    for (index, query) in Query::ALL.iter().enumerate() {
        assert_eq!(QUERY_TABLE[index].query, *query);
        assert_eq!(lookup(*query).query, *query);
    }
}

#[test]
fn only_payload_queries_need_a_deep_copy() {
    let deep: Vec<Query> = QUERY_TABLE
        .iter()
        .filter(|spec| spec.dispatch == Dispatch::PassThrough(BufferPolicy::DeepCopy))
        .map(|spec| spec.query)
        .collect();
    assert_eq!(
        deep,
        vec![Query::SetGroupMeta, Query::SetGroupEpg, Query::SetEsFmt]
    );
}

#[rstest]
#[case(Query::SetActive, Dispatch::PassThrough(BufferPolicy::CopyFree), ArgShape::Bool)]
#[case(Query::SetGroupPcr, Dispatch::PassThrough(BufferPolicy::CopyFree), ArgShape::GroupTime)]
#[case(Query::SetGroupEpg, Dispatch::PassThrough(BufferPolicy::DeepCopy), ArgShape::GroupEpg)]
#[case(Query::SetEsState, Dispatch::PassThrough(BufferPolicy::CopyFree), ArgShape::EsBool)]
#[case(Query::SetEsFmt, Dispatch::PassThrough(BufferPolicy::DeepCopy), ArgShape::EsFormat)]
#[case(Query::GetEmpty, Dispatch::Special, ArgShape::None)]
#[case(Query::GetWakeup, Dispatch::Special, ArgShape::None)]
#[case(Query::GetBuffering, Dispatch::Special, ArgShape::None)]
#[case(Query::SetPauseState, Dispatch::Special, ArgShape::PauseState)]
#[case(Query::SetRate, Dispatch::Special, ArgShape::Rates)]
#[case(Query::SetTime, Dispatch::Special, ArgShape::Time)]
#[case(Query::SetFrameNext, Dispatch::Special, ArgShape::None)]
#[case(Query::SetEsById, Dispatch::Invalid, ArgShape::Int)]
#[case(Query::RestartEsById, Dispatch::Invalid, ArgShape::Int)]
#[case(Query::SetEsDefaultById, Dispatch::Invalid, ArgShape::Int)]
#[case(Query::SetDelay, Dispatch::Invalid, ArgShape::CategoryDelay)]
#[case(Query::SetRecordState, Dispatch::Invalid, ArgShape::Bool)]
#[case(Query::GetTs, Dispatch::Unsupported, ArgShape::Time)]
fn query_dispatch(#[case] query: Query, #[case] dispatch: Dispatch, #[case] args: ArgShape) {
    let spec = lookup(query);
    assert_eq!(spec.dispatch, dispatch);
    assert_eq!(spec.args, args);
}
