mod decoding_test;
mod scenarios_test;
