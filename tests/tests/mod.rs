mod collect;
mod merge;
mod processor;
